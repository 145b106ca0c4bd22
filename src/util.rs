const SENDER_EMAIL: &str = "SENDER_EMAIL";

pub fn get_sender_email() -> Option<String> {
    non_empty_var(SENDER_EMAIL)
}

const SENDER_PASSWORD: &str = "SENDER_PASSWORD";

pub fn get_sender_password() -> Option<String> {
    non_empty_var(SENDER_PASSWORD)
}

const SLACK_MESSAGE_ENDPOINT: &str = "SLACK_MESSAGE_ENDPOINT";

pub fn get_slack_endpoint() -> Option<String> {
    non_empty_var(SLACK_MESSAGE_ENDPOINT)
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
