//! Prompt templates for structured retrieval and pipeline planning.

use weft_core::message::HistoryMessage;
use weft_core::pipeline::PipelineStep;
use weft_core::plugin::PluginSummary;

/// First attempt of a structured retrieval.
pub fn generate_object(schema: &str, prompt: &str) -> String {
    format!(
        "Respond with a single JSON value that matches this JSON Schema.\n\
         Do not add commentary before or after the JSON.\n\n\
         ## Schema\n{schema}\n\n\
         ## Request\n{prompt}\n"
    )
}

/// Follow-up attempt after the previous response was rejected.
pub fn retry_object(schema: &str, prompt: &str, previous: Option<&str>, error: &str) -> String {
    let previous = previous.unwrap_or("(no response was received)");
    format!(
        "Your previous response could not be used.\n\n\
         ## Error\n{error}\n\n\
         ## Previous response\n{previous}\n\n\
         Respond again with a single JSON value that matches this JSON Schema.\n\
         Do not add commentary before or after the JSON.\n\n\
         ## Schema\n{schema}\n\n\
         ## Request\n{prompt}\n"
    )
}

/// Render the plugin roster for the planner.
pub fn render_roster(roster: &[PluginSummary]) -> String {
    if roster.is_empty() {
        return "(no plugins are registered)".into();
    }
    let mut out = String::new();
    for plugin in roster {
        out.push_str(&format!("- {}: {}\n", plugin.id, plugin.description));
        for executor in &plugin.executors {
            out.push_str(&format!("    - {}: {}\n", executor.name, executor.description));
        }
    }
    out
}

pub fn render_history(history: &[HistoryMessage]) -> String {
    if history.is_empty() {
        return "(no earlier messages)".into();
    }
    history
        .iter()
        .map(|m| {
            let role = match m.role {
                weft_core::message::Role::User => "user",
                weft_core::message::Role::Assistant => "assistant",
                weft_core::message::Role::System => "system",
            };
            format!("[{}] {role}: {}", m.timestamp.format("%Y-%m-%d %H:%M"), m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_steps(steps: &[PipelineStep]) -> String {
    if steps.is_empty() {
        return "(none)".into();
    }
    steps
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {s}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Initial plan for an event.
pub fn planning(roster: &str, context: &str, history: Option<&str>) -> String {
    let history = history
        .map(|h| format!("## Recent conversation\n{h}\n\n"))
        .unwrap_or_default();
    format!(
        "You are the planner of an agent runtime. Choose the ordered steps that \
         handle the event below. Each step names a plugin id and one of that \
         plugin's actions. Use only the plugins and actions listed. Return an \
         empty list of steps if nothing needs to be done.\n\n\
         ## Available plugins\n{roster}\n\
         {history}\
         ## Event context\n{context}\n"
    )
}

/// After a step ran: should the rest of the plan change?
pub fn modification(
    roster: &str,
    context: &str,
    executed: &PipelineStep,
    remaining: &str,
) -> String {
    format!(
        "You are reviewing an agent pipeline while it runs. The step `{executed}` \
         has just executed and the event context below includes its result.\n\
         Decide whether the remaining plan should change. Set shouldModify to \
         false to keep the remaining plan as it is. Set shouldModify to true and \
         provide modifiedSteps to replace every remaining step. Use only the \
         plugins and actions listed.\n\n\
         ## Available plugins\n{roster}\n\
         ## Remaining plan\n{remaining}\n\n\
         ## Event context\n{context}\n"
    )
}
