//! Bundled offline answers
//!
//! Prompt/answer pairs shipped with the application and stored into the
//! response cache by the full offline download, so common questions have a
//! cached answer before the companion has ever been online.

/// A shipped prompt with its answer and category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundledResponse {
    pub prompt: &'static str,
    pub response: &'static str,
    pub category: &'static str,
}

const fn bundled(prompt: &'static str, response: &'static str, category: &'static str) -> BundledResponse {
    BundledResponse {
        prompt,
        response,
        category,
    }
}

pub const BUNDLED_RESPONSES: &[BundledResponse] = &[
    bundled("hello", "Hello! It's so nice to talk with you. How are you feeling today?", "greeting"),
    bundled("good morning", "Good morning! I hope you slept well. What would you like to do today?", "greeting"),
    bundled("good night", "Good night. Sleep well, and I'll be right here tomorrow.", "greeting"),
    bundled("how are you", "I'm doing well, thank you for asking. How are you feeling?", "greeting"),
    bundled("thank you", "You're very welcome. I'm always happy to help.", "greeting"),
    bundled("i'm scared", "You're safe right here. I'm with you, and everything is alright.", "anxiety"),
    bundled("where am i", "You're at home, and you're safe.", "orientation"),
    bundled("where is my family", "Your family loves you very much and will be in touch soon.", "family"),
    bundled("who are you", "I'm your companion. I'm here to chat, play music and keep you company.", "identity"),
    bundled("i want to go home", "You're safe where you are. Tell me about your home.", "home"),
    bundled("i can't sleep", "Let's try some calming music and a few slow breaths together.", "sleep"),
    bundled("i'm hungry", "Let's find you something to eat. Is there someone nearby who can help?", "food"),
    bundled("i'm lonely", "You're not alone. I'm here with you.", "loneliness"),
    bundled("tell me a story", "I'd love to. Let's open your story library and pick one together.", "activity"),
    bundled("play some music", "Let's play one of your favorite songs from your music library.", "activity"),
];
