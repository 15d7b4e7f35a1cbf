//! Keyword fallback table
//!
//! When no cached answer matches, the prompt is checked against topic
//! keyword sets in declaration order; the first category with a matching
//! keyword wins. A prompt mentioning both "family" and "scared" is therefore
//! answered by whichever of the two categories is declared first. Callers
//! that want a different precedence build their own [`KeywordTable`].

use serde::{Deserialize, Serialize};

/// One topic with its trigger words and canned answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCategory {
    pub name: String,
    /// Lowercase words or phrases; a match is a substring hit in the prompt
    pub keywords: Vec<String>,
    pub responses: Vec<String>,
}

impl ResponseCategory {
    pub fn new(name: &str, keywords: &[&str], responses: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            responses: responses.iter().map(|r| r.to_string()).collect(),
        }
    }

    /// Whether any keyword occurs in an already normalized prompt
    pub fn matches(&self, normalized_prompt: &str) -> bool {
        self.keywords
            .iter()
            .any(|keyword| contains_keyword(normalized_prompt, keyword))
    }

    /// Deterministic pick among the canned answers
    pub fn response_for(&self, normalized_prompt: &str) -> Option<&str> {
        if self.responses.is_empty() {
            return None;
        }
        let index = normalized_prompt
            .bytes()
            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
        self.responses
            .get(index % self.responses.len())
            .map(String::as_str)
    }
}

/// Multi-word keywords match as substrings; single words must match whole
/// words so "home" does not fire on "homework".
fn contains_keyword(prompt: &str, keyword: &str) -> bool {
    if keyword.contains(' ') {
        return prompt.contains(keyword);
    }
    prompt
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .any(|word| word == keyword)
}

/// Ordered list of categories
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordTable {
    categories: Vec<ResponseCategory>,
}

impl KeywordTable {
    pub fn new(categories: Vec<ResponseCategory>) -> Self {
        Self { categories }
    }

    pub fn categories(&self) -> &[ResponseCategory] {
        &self.categories
    }

    /// First category, in declaration order, matching the prompt
    pub fn find(&self, normalized_prompt: &str) -> Option<&ResponseCategory> {
        self.categories
            .iter()
            .find(|category| category.matches(normalized_prompt))
    }

    /// Add a category with the lowest precedence
    pub fn push(&mut self, category: ResponseCategory) {
        self.categories.push(category);
    }
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self::new(vec![
            ResponseCategory::new(
                "anxiety",
                &["scared", "afraid", "frightened", "worried", "anxious", "nervous", "panic", "dark", "help me"],
                &[
                    "You're safe right here. I'm with you, and everything is alright.",
                    "It's okay to feel that way. Let's take a slow, deep breath together.",
                    "I'm right here with you. Nothing bad is going to happen.",
                ],
            ),
            ResponseCategory::new(
                "orientation",
                &["where am i", "what day", "what year", "what month", "what time", "today", "date"],
                &[
                    "You're at home, and you're safe. Would you like me to tell you what's happening today?",
                    "It's a calm day today. Let's look at your routine together.",
                ],
            ),
            ResponseCategory::new(
                "family",
                &["daughter", "son", "wife", "husband", "family", "grandchildren", "grandson", "granddaughter", "mother", "father", "sister", "brother"],
                &[
                    "Your family loves you very much. Would you like to look at some photos of them?",
                    "Tell me about your family. I'd love to hear about them.",
                ],
            ),
            ResponseCategory::new(
                "identity",
                &["who am i", "my name", "who are you", "don't remember", "forget", "forgot"],
                &[
                    "I'm your companion, here to keep you company. It's alright if things feel a little fuzzy.",
                    "That's okay. Lots of people forget things. I'm here to help you.",
                ],
            ),
            ResponseCategory::new(
                "home",
                &["go home", "want to go home", "my house", "home"],
                &[
                    "You're safe where you are. Tell me about your home. What was your favorite room?",
                    "Home is a lovely place to think about. What do you remember most about it?",
                ],
            ),
            ResponseCategory::new(
                "sleep",
                &["tired", "sleep", "sleepy", "bed", "can't sleep", "nap"],
                &[
                    "It sounds like you could use some rest. Would you like some calming music?",
                    "Resting is a good idea. I'll be right here when you wake up.",
                ],
            ),
            ResponseCategory::new(
                "food",
                &["hungry", "eat", "food", "lunch", "dinner", "breakfast", "thirsty", "drink"],
                &[
                    "Let's find you something to eat or drink. Is there someone nearby who can help?",
                    "A little snack sounds nice. What's your favorite food?",
                ],
            ),
            ResponseCategory::new(
                "health",
                &["pain", "hurt", "hurts", "sick", "dizzy", "medicine", "doctor"],
                &[
                    "I'm sorry you're not feeling well. Let's make sure someone who can help knows about it.",
                    "Let's let your caregiver know how you're feeling so they can help.",
                ],
            ),
            ResponseCategory::new(
                "loneliness",
                &["lonely", "alone", "nobody", "miss", "bored"],
                &[
                    "You're not alone. I'm here with you, and I enjoy our time together.",
                    "I'm happy to keep you company. Would you like to hear a story?",
                ],
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declaration_order_wins() {
        let table = KeywordTable::default();
        let category = table.find("my daughter makes me feel scared").unwrap();
        assert_eq!(category.name, "anxiety");
    }

    #[test]
    fn test_whole_word_matching() {
        let table = KeywordTable::default();
        assert!(table.find("i finished my homework").is_none());
        assert_eq!(table.find("i want to go home").unwrap().name, "home");
    }

    #[test]
    fn test_custom_table_precedence() {
        let mut categories = KeywordTable::default().categories().to_vec();
        categories.rotate_left(2);
        let table = KeywordTable::new(categories);
        assert_eq!(table.find("my daughter makes me feel scared").unwrap().name, "family");
    }

    #[test]
    fn test_response_pick_is_stable() {
        let binding = KeywordTable::default();
        let category = &binding.categories()[0];
        let prompt = "i'm scared";
        assert_eq!(category.response_for(prompt), category.response_for(prompt));
    }
}
