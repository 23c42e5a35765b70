use super::RemediationRequest;

/// Acceptance rules every remediation must follow.
pub const REPAIR_INSTRUCTIONS: &str = "Return a unified diff patch that fixes the minimal root cause. \
Add or update regression tests when the failure is functional. \
Avoid unrelated refactors and preserve public APIs when possible.";

/// Render the single user message sent to the remediation service.
pub fn render(request: &RemediationRequest) -> String {
    let mut prompt = format!(
        "\nRepository: {}\nBranch: {}\nPipeline file: {}\n\nFailure Logs:\n{}\n\n{}",
        request.repository,
        request.branch,
        request.pipeline_path,
        request.evidence.as_str(),
        REPAIR_INSTRUCTIONS,
    );

    if let Some(gates) = verification_sentence(&request.verification_commands) {
        prompt.push(' ');
        prompt.push_str(&gates);
    }
    prompt.push('\n');
    prompt
}

fn verification_sentence(commands: &[String]) -> Option<String> {
    let quoted: Vec<String> = commands
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(|c| format!("'{}'", c))
        .collect();

    match quoted.len() {
        0 => None,
        1 => Some(format!("Ensure {} passes locally.", quoted[0])),
        2 => Some(format!("Ensure {} and {} pass locally.", quoted[0], quoted[1])),
        n => Some(format!(
            "Ensure {}, and {} pass locally.",
            quoted[..n - 1].join(", "),
            quoted[n - 1]
        )),
    }
}
