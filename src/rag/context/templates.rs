//! Chat templates and the grounded-answer prompt

use serde::{Deserialize, Serialize};

/// Reply used when the documents hold nothing relevant
pub const NO_DATA_REPLY: &str = "В документе нет данных";

/// Standing instruction for every grounded answer
pub const SYSTEM_INSTRUCTION: &str = concat!(
    "Ты русскоязычный ассистент для работы с документами. Правила:\n",
    "1. Отвечай только на основе предоставленных документов.\n",
    "2. Если информации нет, отвечай: \"В документе нет данных\".\n",
    "3. Будь максимально точен.\n",
    "4. Отвечай только на русском языке."
);

/// Instruction for hosted chat models that take the context in the system turn
pub const HOSTED_SYSTEM_PREFIX: &str =
    "Ты ассистент, который отвечает на вопросы пользователя, оперируя только следующей информацией\n";

/// User turn carrying the retrieved documents and the question.
///
/// The question is caller input, so its role markers are removed too.
pub fn user_message(question: &str, context: &str) -> String {
    format!(
        "Документы:\n{}\nВопрос: {}\nОтветь на русском языке, опираясь только на документы.",
        context,
        strip_role_markers(question)
    )
}

/// Role-marker conventions of the chat models we drive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChatTemplate {
    /// TinyLlama / Zephyr: `<|system|>`, `<|user|>`, `<|assistant|>`, `</s>`
    #[default]
    Zephyr,
    /// Qwen: `<|im_start|>role` ... `<|im_end|>`
    ChatMl,
}

const ZEPHYR_MARKERS: &[&str] = &["<|system|>", "<|user|>", "<|assistant|>", "</s>"];
const CHATML_MARKERS: &[&str] = &[
    "<|im_start|>system",
    "<|im_start|>user",
    "<|im_start|>assistant",
    "<|im_start|>",
    "<|im_end|>",
    "<|endoftext|>",
];

impl ChatTemplate {
    /// Pick the template from a checkpoint id
    pub fn for_model(model_id: &str) -> Self {
        if model_id.to_lowercase().contains("qwen") {
            Self::ChatMl
        } else {
            Self::Zephyr
        }
    }

    pub fn markers(&self) -> &'static [&'static str] {
        match self {
            Self::Zephyr => ZEPHYR_MARKERS,
            Self::ChatMl => CHATML_MARKERS,
        }
    }

    /// Marker that opens the assistant's turn
    pub fn assistant_marker(&self) -> &'static str {
        match self {
            Self::Zephyr => "<|assistant|>",
            Self::ChatMl => "<|im_start|>assistant",
        }
    }

    /// Marker that closes a turn
    pub fn end_of_turn(&self) -> &'static str {
        match self {
            Self::Zephyr => "</s>",
            Self::ChatMl => "<|im_end|>",
        }
    }

    /// System turn, user turn and an open assistant turn
    pub fn render(&self, system: &str, user: &str) -> String {
        match self {
            Self::Zephyr => format!(
                "<|system|>\n{}</s>\n<|user|>\n{}</s>\n<|assistant|>\n",
                system, user
            ),
            Self::ChatMl => format!(
                "<|im_start|>system\n{}<|im_end|>\n<|im_start|>user\n{}<|im_end|>\n<|im_start|>assistant\n",
                system, user
            ),
        }
    }

    /// Full grounded prompt for a question
    pub fn grounded_prompt(&self, question: &str, context: &str) -> String {
        self.render(SYSTEM_INSTRUCTION, &user_message(question, context))
    }
}

/// Remove the role markers of every known template.
///
/// Repeats until clean, since a removal can splice a new marker together.
pub fn strip_role_markers(text: &str) -> String {
    let mut cleaned = text.to_string();
    while contains_role_marker(&cleaned) {
        for marker in CHATML_MARKERS.iter().chain(ZEPHYR_MARKERS) {
            cleaned = cleaned.replace(marker, "");
        }
    }
    cleaned
}

/// True if `text` contains any known role marker
pub fn contains_role_marker(text: &str) -> bool {
    CHATML_MARKERS
        .iter()
        .chain(ZEPHYR_MARKERS)
        .any(|marker| text.contains(marker))
}
