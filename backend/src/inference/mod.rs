pub mod gemini;
pub mod prompt;
