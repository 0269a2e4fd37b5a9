//! Test doubles shared by the core unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use studyforge_provider::{GenerationRequest, TextGenerator};
use studyforge_shared::{Result, StudyForgeError};

enum Script {
    Queue(Mutex<VecDeque<String>>),
    Repeat(String),
    Respond(Box<dyn Fn(&str) -> String + Send + Sync>),
    Fail,
}

/// A [`TextGenerator`] that replays canned responses and records requests.
pub struct ScriptedGenerator {
    script: Script,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    fn with_script(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Answer with each response in turn; fails once the queue runs dry.
    pub fn new<I, S>(responses: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_script(Script::Queue(Mutex::new(
            responses.into_iter().map(Into::into).collect(),
        )))
    }

    pub fn repeating(response: &str) -> Arc<Self> {
        Self::with_script(Script::Repeat(response.to_string()))
    }

    /// Compute the response from the prompt.
    pub fn with_fn(respond: impl Fn(&str) -> String + Send + Sync + 'static) -> Arc<Self> {
        Self::with_script(Script::Respond(Box::new(respond)))
    }

    /// Every call fails as an unavailable upstream.
    pub fn failing() -> Arc<Self> {
        Self::with_script(Script::Fail)
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.prompt.clone())
            .collect()
    }

    /// MIME type of the attached image per call.
    pub fn images(&self) -> Vec<Option<String>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.image.as_ref().map(|i| i.mime_type.clone()))
            .collect()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.script {
            Script::Queue(queue) => queue
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| StudyForgeError::UpstreamUnavailable("script exhausted".into())),
            Script::Repeat(response) => Ok(response.clone()),
            Script::Respond(respond) => Ok(respond(&request.prompt)),
            Script::Fail => Err(StudyForgeError::UpstreamUnavailable(
                "stub upstream returned 503".into(),
            )),
        }
    }
}

/// A well-formed extraction response listing `concepts`.
pub fn structured_output(concepts: &[&str]) -> String {
    let bullets = |items: Vec<String>| {
        items
            .iter()
            .map(|i| format!("- {i}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let concepts: Vec<String> = concepts.iter().map(|c| c.to_string()).collect();
    let definitions = concepts
        .iter()
        .map(|c| format!("{c}: the idea named {c}"))
        .collect();
    let examples = concepts
        .iter()
        .map(|c| format!("A worked problem about {c}"))
        .collect();
    let diagrams = concepts
        .iter()
        .map(|c| format!("Figure showing {c}"))
        .collect();

    format!(
        "## 1. Core Concepts\n{}\n\n\
         ## 2. Definitions\n{}\n\n\
         ## 3. Examples\n{}\n\n\
         ## 4. Diagram Descriptions\n{}\n\n\
         ## 5. Study Notes\n\
         These notes walk through the material in its original order, keeping \
         every formula and term exactly as written in the source.",
        bullets(concepts.clone()),
        bullets(definitions),
        bullets(examples),
        bullets(diagrams),
    )
}
