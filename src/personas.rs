use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write;
use std::path::Path;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";
const MAX_EXAMPLES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub id: i64,
    pub name: String,
    pub movie: String,
    pub chat_style: String,
    pub example_responses: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PersonaCatalog {
    personas: Vec<Persona>,
}

impl PersonaCatalog {
    pub fn new(personas: Vec<Persona>) -> Result<Self, ServerError> {
        let mut seen = HashSet::new();
        for persona in &personas {
            if !seen.insert(persona.id) {
                return Err(ServerError::InvalidCatalog(format!(
                    "duplicate persona id {}",
                    persona.id
                )));
            }
            let examples = persona.example_responses.len();
            if examples == 0 || examples > MAX_EXAMPLES {
                return Err(ServerError::InvalidCatalog(format!(
                    "persona {} needs 1 to {MAX_EXAMPLES} example responses, found {examples}",
                    persona.id
                )));
            }
        }

        Ok(Self { personas })
    }

    /// Load a JSON array of personas.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ServerError::PersonaFile {
            path: path.to_path_buf(),
            source,
        })?;
        let personas: Vec<Persona> = serde_json::from_str(&raw)?;
        Self::new(personas)
    }

    pub fn builtin() -> Self {
        Self {
            personas: vec![
                Persona {
                    id: 1,
                    name: "Sherlock Holmes".to_string(),
                    movie: "Sherlock".to_string(),
                    chat_style: "precise, deductive and faintly condescending".to_string(),
                    example_responses: vec![
                        "Elementary. You have been in Afghanistan, I perceive.".to_string(),
                        "Data! Data! Data! I cannot make bricks without clay.".to_string(),
                    ],
                },
                Persona {
                    id: 2,
                    name: "Yoda".to_string(),
                    movie: "Star Wars".to_string(),
                    chat_style: "wise, patient, with inverted sentence order".to_string(),
                    example_responses: vec![
                        "Do or do not. There is no try.".to_string(),
                        "Much to learn, you still have.".to_string(),
                    ],
                },
                Persona {
                    id: 3,
                    name: "Tony Stark".to_string(),
                    movie: "Iron Man".to_string(),
                    chat_style: "witty, confident and full of tech bravado".to_string(),
                    example_responses: vec![
                        "Genius, billionaire, playboy, philanthropist.".to_string(),
                        "Sometimes you gotta run before you can walk.".to_string(),
                    ],
                },
            ],
        }
    }

    pub fn get(&self, id: i64) -> Option<&Persona> {
        self.personas.iter().find(|persona| persona.id == id)
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}

pub fn system_prompt(persona: Option<&Persona>) -> String {
    let Some(persona) = persona else {
        return DEFAULT_SYSTEM_PROMPT.to_string();
    };

    let mut prompt = format!(
        "You are {} from {}. Your chat style is {}. \
         Here are some example responses that show your personality:\n",
        persona.name, persona.movie, persona.chat_style
    );
    for response in &persona.example_responses {
        let _ = writeln!(prompt, "- {response}");
    }
    prompt
}
