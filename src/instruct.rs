//! Instruction-template families.
//!
//! Each family is a fixed record of delimiter strings. Strategies never branch
//! on the family itself; they read markers from the record returned by
//! [`InstructSlug::template`].

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Model families with a known instruction format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InstructSlug {
    Alpaca,
    Metharme,
    Mistral,
    Vicuna,
    Llama3,
    Chatml,
    Lyra,
    Gemma3,
    Deepseek,
    Danchat2,
    Glm45,
    Harmony,
}

impl InstructSlug {
    pub const ALL: [InstructSlug; 12] = [
        InstructSlug::Alpaca,
        InstructSlug::Metharme,
        InstructSlug::Mistral,
        InstructSlug::Vicuna,
        InstructSlug::Llama3,
        InstructSlug::Chatml,
        InstructSlug::Lyra,
        InstructSlug::Gemma3,
        InstructSlug::Deepseek,
        InstructSlug::Danchat2,
        InstructSlug::Glm45,
        InstructSlug::Harmony,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstructSlug::Alpaca => "alpaca",
            InstructSlug::Metharme => "metharme",
            InstructSlug::Mistral => "mistral",
            InstructSlug::Vicuna => "vicuna",
            InstructSlug::Llama3 => "llama3",
            InstructSlug::Chatml => "chatml",
            InstructSlug::Lyra => "lyra",
            InstructSlug::Gemma3 => "gemma3",
            InstructSlug::Deepseek => "deepseek",
            InstructSlug::Danchat2 => "danchat2",
            InstructSlug::Glm45 => "glm45",
            InstructSlug::Harmony => "harmony",
        }
    }

    /// Families whose models think in a `<think>` block before answering.
    pub fn has_reasoning(&self) -> bool {
        matches!(self, InstructSlug::Deepseek | InstructSlug::Glm45)
    }

    pub fn template(&self) -> &'static InstructTemplate {
        match self {
            InstructSlug::Alpaca => &ALPACA,
            InstructSlug::Metharme => &METHARME,
            InstructSlug::Mistral => &MISTRAL,
            InstructSlug::Vicuna => &VICUNA,
            InstructSlug::Llama3 => &LLAMA3,
            InstructSlug::Chatml => &CHATML,
            InstructSlug::Lyra => &LYRA,
            InstructSlug::Gemma3 => &GEMMA3,
            InstructSlug::Deepseek => &DEEPSEEK,
            InstructSlug::Danchat2 => &DANCHAT2,
            InstructSlug::Glm45 => &GLM45,
            InstructSlug::Harmony => &HARMONY,
        }
    }
}

impl fmt::Display for InstructSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delimiters for one instruction family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructTemplate {
    pub bos: &'static str,
    pub system_start: &'static str,
    pub system_end: &'static str,
    pub input_start: &'static str,
    pub input_end: &'static str,
    pub output_start: &'static str,
    /// Appended after `output_start` on the final ask line only.
    pub output_ask: &'static str,
    pub output_end: &'static str,
    pub eos: &'static str,
    pub stops: &'static [&'static str],
}

/// Markers used when rendering a transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleplayMarkers {
    /// Closes a response and opens an instruction.
    pub instruction: String,
    /// Closes an instruction and opens a response.
    pub response: String,
    /// Like `response`, plus the family's ask prefix.
    pub ask_line: String,
}

impl InstructTemplate {
    pub fn roleplay_markers(&self) -> RoleplayMarkers {
        RoleplayMarkers {
            instruction: format!("{}{}", self.output_end, self.input_start),
            response: format!("{}{}", self.input_end, self.output_start),
            ask_line: format!("{}{}{}", self.input_end, self.output_start, self.output_ask),
        }
    }
}

const ALPACA: InstructTemplate = InstructTemplate {
    bos: "",
    system_start: "",
    system_end: "\n",
    input_start: "### Instruction:\n",
    input_end: "\n",
    output_start: "### Response:\n",
    output_ask: "",
    output_end: "\n",
    eos: "",
    stops: &["###", "\n\n\n"],
};

const METHARME: InstructTemplate = InstructTemplate {
    bos: "",
    system_start: "<|system|>",
    system_end: "",
    input_start: "<|user|>",
    input_end: "",
    output_start: "<|model|>",
    output_ask: "",
    output_end: "",
    eos: "<|end_of_text|>",
    stops: &["<|system|>", "<|user|>", "<|model|>", "<|end_of_text|>"],
};

const MISTRAL: InstructTemplate = InstructTemplate {
    bos: "<s>",
    system_start: "[INST]",
    system_end: "[/INST]",
    input_start: "[INST]",
    input_end: "[/INST]",
    output_start: "",
    output_ask: "",
    output_end: "</s>",
    eos: "</s>",
    stops: &["INST", "/INST", "<|end_of_text|>", "</s>"],
};

const VICUNA: InstructTemplate = InstructTemplate {
    bos: "",
    system_start: "",
    system_end: "",
    input_start: "\nUSER:\n",
    input_end: "",
    output_start: "\nASSISTANT:\n",
    output_ask: "",
    output_end: "",
    eos: "</s>",
    stops: &["USER:", "ASSISTANT:", "</s>"],
};

const LLAMA3: InstructTemplate = InstructTemplate {
    bos: "<|begin_of_text|>",
    system_start: "<|start_header_id|>system<|end_header_id|>\n",
    system_end: "<|eot_id|>\n",
    input_start: "<|start_header_id|>user<|end_header_id|>\n",
    input_end: "<|eot_id|>",
    output_start: "<|start_header_id|>assistant<|end_header_id|>\n",
    output_ask: "",
    output_end: "<|eot_id|>",
    eos: "<|end_of_text|>",
    stops: &[
        "<|start_header_id|>",
        "<|end_header_id|>",
        "<|eot_id|>",
        "<|end_of_text|>",
    ],
};

const CHATML: InstructTemplate = InstructTemplate {
    bos: "",
    system_start: "<|im_start|>system\n",
    system_end: "<|im_end|>\n",
    input_start: "<|im_start|>user\n",
    input_end: "<|im_end|>\n",
    output_start: "<|im_start|>assistant\n",
    output_ask: "",
    output_end: "<|im_end|>\n",
    eos: "<|end_of_text|>",
    stops: &["<|im_start|>", "<|im_end|>", "<|end_of_text|>"],
};

const LYRA: InstructTemplate = InstructTemplate {
    eos: "</s>",
    stops: &[
        "INST",
        "/INST",
        "<|im_end|>",
        "</s>",
        "<s>",
        "<|im_start|>",
        "<|end_of_text|>",
    ],
    ..CHATML
};

const GEMMA3: InstructTemplate = InstructTemplate {
    bos: "<bos>",
    system_start: "<start_of_turn>user",
    system_end: "<end_of_turn>",
    input_start: "<start_of_turn>user",
    input_end: "<end_of_turn>",
    output_start: "<start_of_turn>assistant",
    output_ask: "",
    output_end: "<end_of_turn>",
    eos: "<eos>",
    stops: &["<start_of_turn>", "<end_of_turn>", "<bos>", "<eos>"],
};

const DEEPSEEK: InstructTemplate = InstructTemplate {
    bos: "",
    system_start: "",
    system_end: "",
    input_start: "<｜User｜>",
    input_end: "",
    output_start: "<｜Assistant｜>",
    output_ask: "",
    output_end: "",
    eos: "",
    stops: &["<|", "<｜", "<｜User｜>", "<｜Assistant｜>"],
};

const DANCHAT2: InstructTemplate = InstructTemplate {
    bos: "",
    system_start: "<|system|>",
    system_end: "<|endoftext|>",
    input_start: "<|user|>",
    input_end: "<|endoftext|>",
    output_start: "<|assistant|>",
    output_ask: "",
    output_end: "<|endoftext|>",
    eos: "<|endoftext|>",
    stops: &["<|system|>", "<|user|>", "<|assistant|>", "<|endoftext|>"],
};

const GLM45: InstructTemplate = InstructTemplate {
    bos: "",
    system_start: "<|system|>",
    system_end: "",
    input_start: "<|user|>",
    input_end: ">",
    output_start: "<|assistant|>",
    output_ask: "",
    output_end: "",
    eos: "",
    stops: &[
        "<|system|>",
        "<|user|>",
        "<|assistant|>",
        "</think>",
        "<think>",
        "<tool",
        "</tool",
    ],
};

const HARMONY: InstructTemplate = InstructTemplate {
    bos: "",
    system_start: "<|start|>system<|message|>",
    system_end: "<|end|>\n",
    input_start: "<|start|>user<|message|>",
    input_end: "<|end|>\n",
    output_start: "<|start|>assistant<|channel|>final<|message|>",
    output_ask: "<|channel|>analysis<|message|>We must act as the character, respond with the reaction and the text.<|end|><|start|>assistant<|channel|>final<|message|>",
    output_end: "<|end|>\n",
    eos: "<|return|>",
    stops: &[
        "<|start|>",
        "<|end|>",
        "<|message|>",
        "<|channel|>",
        "<|return|>",
    ],
};
