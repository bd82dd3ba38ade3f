//! One transcription job: fetch the audio, transcribe it, reply in-chat,
//! and delete the temporary artifact no matter how the job ends.
//!
//! The deadline lives in the dispatcher, which wraps the whole of
//! [`TranscriptionJob::run`]; on expiry it calls [`TranscriptionJob::cleanup`]
//! and [`TranscriptionJob::notify_failure`] itself, since the cancelled
//! future can no longer do either.

use anyhow::anyhow;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::classify::{format_transcript, ERROR_MARKER};
use crate::context::EngineContext;
use crate::ingress::{InboundEvent, MediaDescriptor};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("media unavailable: {0}")]
    MediaUnavailable(#[source] anyhow::Error),

    #[error("transcription failed: {0}")]
    Transcription(#[source] anyhow::Error),

    #[error("job deadline of {0:?} exceeded")]
    Timeout(Duration),

    #[error("reply delivery failed: {0}")]
    Delivery(#[source] anyhow::Error),
}

impl JobError {
    /// Human-readable, marker-tagged notice for the originating chat.
    /// Every variant starts with [`ERROR_MARKER`] so the classifier can
    /// never feed a notice back into the engine.
    pub fn user_notice(&self) -> String {
        match self {
            JobError::MediaUnavailable(_) => {
                format!("{ERROR_MARKER} (arquivo não encontrado).")
            }
            JobError::Timeout(_) => {
                format!("{ERROR_MARKER} (tempo esgotado). Por favor, tente novamente.")
            }
            JobError::Transcription(_) | JobError::Delivery(_) => {
                format!("{ERROR_MARKER}. Por favor, tente novamente.")
            }
        }
    }
}

/// Fetch → transcribe → reply → cleanup for one qualifying event.
pub struct TranscriptionJob {
    chat: String,
    quoted_id: String,
    media: MediaDescriptor,
    artifact: PathBuf,
}

impl TranscriptionJob {
    /// Build a job from an event carrying audio. Returns `None` for events
    /// without an audio payload (the classifier does not produce those).
    pub fn new(event: &InboundEvent, media_dir: &Path) -> Option<Self> {
        let media = event.audio.clone()?;
        // Embed the declared length (useful when matching a job to its log
        // lines) and a random discriminator so concurrent jobs for
        // equally-sized payloads never collide.
        let disc = Uuid::new_v4().simple().to_string();
        let artifact = media_dir.join(format!(
            "audio-{}-{}.webm",
            media.file_length,
            &disc[..8]
        ));
        Some(Self {
            chat: event.chat.clone(),
            quoted_id: event.message_id.clone(),
            media,
            artifact,
        })
    }

    pub fn chat(&self) -> &str {
        &self.chat
    }

    pub fn quoted_id(&self) -> &str {
        &self.quoted_id
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact
    }

    /// Run the job to a terminal state. The artifact is removed on every
    /// exit path, and any failure produces one best-effort error notice.
    pub async fn run(&self, ctx: &EngineContext) -> Result<(), JobError> {
        let result = self.execute(ctx).await;
        self.cleanup().await;

        match &result {
            Ok(()) => info!(chat = %self.chat, "transcription delivered"),
            Err(kind) => {
                error!(chat = %self.chat, error = %kind, "transcription job failed");
                self.notify_failure(ctx, kind).await;
            }
        }
        result
    }

    async fn execute(&self, ctx: &EngineContext) -> Result<(), JobError> {
        info!(path = %self.media.direct_path, "downloading audio message");
        let bytes = ctx
            .transport
            .download_media(&self.media)
            .await
            .map_err(JobError::MediaUnavailable)?;

        if self.media.matches_plaintext_hash(&bytes) == Some(false) {
            return Err(JobError::MediaUnavailable(anyhow!(
                "downloaded audio does not match the declared content hash"
            )));
        }

        tokio::fs::write(&self.artifact, &bytes)
            .await
            .map_err(|e| JobError::MediaUnavailable(e.into()))?;
        info!(artifact = %self.artifact.display(), "audio staged for transcription");

        let t = &ctx.config.transcription;
        let transcript = ctx
            .transcriber
            .transcribe(
                &self.artifact,
                t.language.as_deref(),
                t.guidance_prompt.as_deref(),
            )
            .await
            .map_err(JobError::Transcription)?;
        info!(chat = %self.chat, "audio transcription completed");

        let reply = format_transcript(&transcript);
        ctx.transport
            .send_reply(&self.chat, &reply, Some(&self.quoted_id))
            .await
            .map_err(JobError::Delivery)?;
        Ok(())
    }

    /// Delete the temporary artifact. Idempotent: "already gone" is fine,
    /// including when racing a cleanup that already ran.
    pub async fn cleanup(&self) {
        match tokio::fs::remove_file(&self.artifact).await {
            Ok(()) => debug!(artifact = %self.artifact.display(), "temporary audio removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!(
                artifact = %self.artifact.display(),
                "failed to remove temporary audio: {e}"
            ),
        }
    }

    /// One best-effort error notice to the originating chat. A failed
    /// notice is only logged; there are no cascading retries.
    pub async fn notify_failure(&self, ctx: &EngineContext, kind: &JobError) {
        let notice = kind.user_notice();
        if let Err(e) = ctx
            .transport
            .send_reply(&self.chat, &notice, Some(&self.quoted_id))
            .await
        {
            error!(chat = %self.chat, "failed to deliver error notice: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ingress::BridgeApi;
    use crate::registry::ExclusionRegistry;
    use crate::transcribe::Transcriber;
    use anyhow::Result;
    use async_trait::async_trait;
    use base64::{engine::general_purpose, Engine as _};
    use sha2::{Digest, Sha256};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    struct MockBridge {
        audio: Result<Vec<u8>, String>,
        fail_replies: bool,
        replies: Mutex<Vec<(String, String)>>,
    }

    impl MockBridge {
        fn serving(audio: &[u8]) -> Self {
            Self {
                audio: Ok(audio.to_vec()),
                fail_replies: false,
                replies: Mutex::new(Vec::new()),
            }
        }

        fn failing_download() -> Self {
            Self {
                audio: Err("media gone".to_string()),
                fail_replies: false,
                replies: Mutex::new(Vec::new()),
            }
        }

        fn replies(&self) -> Vec<(String, String)> {
            self.replies.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BridgeApi for MockBridge {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
        async fn get_events(
            &self,
            _offset: Option<i64>,
            _timeout_secs: u64,
        ) -> Result<Vec<crate::ingress::BridgeEvent>> {
            Ok(vec![])
        }
        async fn download_media(&self, _media: &MediaDescriptor) -> Result<Vec<u8>> {
            match &self.audio {
                Ok(bytes) => Ok(bytes.clone()),
                Err(msg) => Err(anyhow!(msg.clone())),
            }
        }
        async fn send_reply(&self, chat: &str, text: &str, _quoted_id: Option<&str>) -> Result<()> {
            if self.fail_replies {
                anyhow::bail!("delivery refused");
            }
            self.replies
                .lock()
                .unwrap()
                .push((chat.to_string(), text.to_string()));
            Ok(())
        }
    }

    struct MockTranscriber {
        output: Result<String, String>,
        calls: AtomicUsize,
    }

    impl MockTranscriber {
        fn returning(text: &str) -> Self {
            Self {
                output: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                output: Err("provider rejected".to_string()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transcriber for MockTranscriber {
        async fn transcribe(
            &self,
            _path: &Path,
            _language: Option<&str>,
            _prompt: Option<&str>,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.output {
                Ok(text) => Ok(text.clone()),
                Err(msg) => Err(anyhow!(msg.clone())),
            }
        }
    }

    fn descriptor_for(bytes: &[u8]) -> MediaDescriptor {
        MediaDescriptor {
            direct_path: "/v/t62.7117-24/abc".to_string(),
            file_enc_sha256: "ZW5j".to_string(),
            file_sha256: general_purpose::STANDARD.encode(Sha256::digest(bytes)),
            media_key: "a2V5".to_string(),
            file_length: bytes.len() as u64,
            mime_type: Some("audio/ogg; codecs=opus".to_string()),
        }
    }

    fn audio_event(media: MediaDescriptor) -> InboundEvent {
        InboundEvent {
            id: Uuid::new_v4(),
            message_id: "3EB0".to_string(),
            chat: "551188887777@s.whatsapp.net".to_string(),
            sender: "551188887777".to_string(),
            from_me: false,
            is_group: false,
            text: None,
            audio: Some(media),
            timestamp: 1_700_000_000,
        }
    }

    fn context(
        dir: &Path,
        transport: Arc<MockBridge>,
        transcriber: Arc<MockTranscriber>,
    ) -> EngineContext {
        let mut config = Config::default();
        config.engine.media_dir = dir.to_string_lossy().into_owned();
        config.engine.exclusions_file = dir.join("exclude.txt").to_string_lossy().into_owned();
        EngineContext {
            config,
            transport,
            transcriber,
            registry: ExclusionRegistry::new(dir.join("exclude.txt")),
        }
    }

    #[tokio::test]
    async fn success_formats_reply_and_removes_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let audio = vec![1u8; 48213];
        let bridge = Arc::new(MockBridge::serving(&audio));
        let transcriber = Arc::new(MockTranscriber::returning("  oi tudo bem"));
        let ctx = context(tmp.path(), bridge.clone(), transcriber);

        let event = audio_event(descriptor_for(&audio));
        let job = TranscriptionJob::new(&event, tmp.path()).unwrap();
        assert!(job
            .artifact_path()
            .to_string_lossy()
            .contains("48213"));

        job.run(&ctx).await.unwrap();

        let replies = bridge.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, "551188887777@s.whatsapp.net");
        assert_eq!(replies[0].1, "*Transcrição automática:*\n\noi tudo bem");
        assert!(!job.artifact_path().exists());
    }

    #[tokio::test]
    async fn download_failure_sends_media_notice() {
        let tmp = tempfile::tempdir().unwrap();
        let bridge = Arc::new(MockBridge::failing_download());
        let transcriber = Arc::new(MockTranscriber::returning("nunca usado"));
        let ctx = context(tmp.path(), bridge.clone(), transcriber.clone());

        let event = audio_event(descriptor_for(b"whatever"));
        let job = TranscriptionJob::new(&event, tmp.path()).unwrap();

        let err = job.run(&ctx).await.unwrap_err();
        assert!(matches!(err, JobError::MediaUnavailable(_)));
        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 0);

        let replies = bridge.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].1, "Erro ao processar o áudio (arquivo não encontrado).");
        assert!(!job.artifact_path().exists());
    }

    #[tokio::test]
    async fn hash_mismatch_is_media_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let bridge = Arc::new(MockBridge::serving(b"tampered bytes"));
        let transcriber = Arc::new(MockTranscriber::returning("nunca usado"));
        let ctx = context(tmp.path(), bridge.clone(), transcriber.clone());

        // Descriptor carries the hash of different content.
        let event = audio_event(descriptor_for(b"original bytes"));
        let job = TranscriptionJob::new(&event, tmp.path()).unwrap();

        let err = job.run(&ctx).await.unwrap_err();
        assert!(matches!(err, JobError::MediaUnavailable(_)));
        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 0);
        assert!(!job.artifact_path().exists());
    }

    #[tokio::test]
    async fn transcription_failure_sends_generic_notice() {
        let tmp = tempfile::tempdir().unwrap();
        let audio = b"valid audio".to_vec();
        let bridge = Arc::new(MockBridge::serving(&audio));
        let transcriber = Arc::new(MockTranscriber::failing());
        let ctx = context(tmp.path(), bridge.clone(), transcriber);

        let event = audio_event(descriptor_for(&audio));
        let job = TranscriptionJob::new(&event, tmp.path()).unwrap();

        let err = job.run(&ctx).await.unwrap_err();
        assert!(matches!(err, JobError::Transcription(_)));

        let replies = bridge.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(
            replies[0].1,
            "Erro ao processar o áudio. Por favor, tente novamente."
        );
        assert!(!job.artifact_path().exists());
    }

    #[tokio::test]
    async fn delivery_failure_still_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let audio = b"valid audio".to_vec();
        let mut bridge = MockBridge::serving(&audio);
        bridge.fail_replies = true;
        let bridge = Arc::new(bridge);
        let transcriber = Arc::new(MockTranscriber::returning("oi"));
        let ctx = context(tmp.path(), bridge.clone(), transcriber);

        let event = audio_event(descriptor_for(&audio));
        let job = TranscriptionJob::new(&event, tmp.path()).unwrap();

        let err = job.run(&ctx).await.unwrap_err();
        assert!(matches!(err, JobError::Delivery(_)));
        // The follow-up notice also failed; nothing was recorded, nothing
        // was retried, and the artifact is gone.
        assert!(bridge.replies().is_empty());
        assert!(!job.artifact_path().exists());
    }

    #[tokio::test]
    async fn cleanup_tolerates_missing_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let event = audio_event(descriptor_for(b"bytes"));
        let job = TranscriptionJob::new(&event, tmp.path()).unwrap();
        // Nothing was ever written; both calls are no-ops.
        job.cleanup().await;
        job.cleanup().await;
    }

    #[test]
    fn events_without_audio_make_no_job() {
        let tmp = tempfile::tempdir().unwrap();
        let mut event = audio_event(descriptor_for(b"bytes"));
        event.audio = None;
        assert!(TranscriptionJob::new(&event, tmp.path()).is_none());
    }

    #[test]
    fn notices_carry_the_error_marker() {
        let errors = [
            JobError::MediaUnavailable(anyhow!("x")),
            JobError::Transcription(anyhow!("x")),
            JobError::Timeout(Duration::from_secs(15)),
            JobError::Delivery(anyhow!("x")),
        ];
        for err in &errors {
            assert!(err.user_notice().starts_with(ERROR_MARKER));
        }
    }
}
