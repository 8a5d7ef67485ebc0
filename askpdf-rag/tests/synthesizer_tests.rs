//! Prompt construction and truncation against a recording completion service.

use std::sync::{Arc, Mutex};

use askpdf_rag::synthesizer::render_prompt;
use askpdf_rag::{CompletionService, PromptSynthesizer, RagError, Result, Synthesizer};
use async_trait::async_trait;

#[derive(Default)]
struct RecordingService {
    prompts: Mutex<Vec<String>>,
}

impl RecordingService {
    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for RecordingService {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("forty-two".to_string())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

const QUESTION: &str = "What is the answer?";
const CONTEXT: [&str; 3] = ["most similar chunk", "second best chunk", "least similar chunk"];

fn rendered_len(context: &[&str]) -> usize {
    render_prompt(QUESTION, context).chars().count()
}

#[tokio::test]
async fn sends_all_context_in_one_call_when_it_fits() {
    let service = Arc::new(RecordingService::default());
    let synthesizer = PromptSynthesizer::new(service.clone(), 24_000);

    let synthesis = synthesizer.synthesize(QUESTION, &CONTEXT).await.unwrap();

    assert_eq!(synthesis.text, "forty-two");
    assert_eq!(synthesis.dropped_chunks, 0);
    assert_eq!(service.prompts(), [render_prompt(QUESTION, &CONTEXT)]);
}

#[tokio::test]
async fn drops_least_similar_chunks_first() {
    let service = Arc::new(RecordingService::default());
    let limit = rendered_len(&CONTEXT[..2]);
    let synthesizer = PromptSynthesizer::new(service.clone(), limit);

    let synthesis = synthesizer.synthesize(QUESTION, &CONTEXT).await.unwrap();

    assert_eq!(synthesis.dropped_chunks, 1);
    let prompts = service.prompts();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0], render_prompt(QUESTION, &CONTEXT[..2]));
    assert!(prompts[0].chars().count() <= limit);
    assert!(!prompts[0].contains("least similar chunk"));
}

#[tokio::test]
async fn limit_one_below_a_chunk_drops_it() {
    let service = Arc::new(RecordingService::default());
    let synthesizer = PromptSynthesizer::new(service.clone(), rendered_len(&CONTEXT[..1]) - 1);

    let synthesis = synthesizer.synthesize(QUESTION, &CONTEXT).await.unwrap();

    assert_eq!(synthesis.dropped_chunks, 3);
    assert_eq!(service.prompts(), [render_prompt(QUESTION, &[])]);
}

#[tokio::test]
async fn question_alone_over_the_limit_is_rejected() {
    let service = Arc::new(RecordingService::default());
    let synthesizer = PromptSynthesizer::new(service.clone(), rendered_len(&[]) - 1);

    let err = synthesizer.synthesize(QUESTION, &CONTEXT).await.unwrap_err();

    assert!(matches!(err, RagError::Validation(_)));
    assert!(service.prompts().is_empty());
}

#[tokio::test]
async fn service_errors_pass_through() {
    struct Failing;

    #[async_trait]
    impl CompletionService for Failing {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Err(RagError::Upstream {
                service: "failing".into(),
                status: Some(401),
                message: "invalid api key".into(),
            })
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    let synthesizer = PromptSynthesizer::new(Arc::new(Failing), 24_000);
    let err = synthesizer.synthesize(QUESTION, &CONTEXT).await.unwrap_err();
    assert!(matches!(err, RagError::Upstream { status: Some(401), .. }));
}
