/// Model used by the quick conversational tool.
pub const ASK_MODEL: &str = "sonar-pro";
/// Model used for long-running, multi-source research.
pub const RESEARCH_MODEL: &str = "sonar-deep-research";
/// Model used for step-by-step reasoning.
pub const REASON_MODEL: &str = "sonar-reasoning-pro";

pub const CHAT_COMPLETIONS_ENDPOINT: &str = "chat/completions";
pub const SEARCH_ENDPOINT: &str = "search";
