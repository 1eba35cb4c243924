//! Extraction of inline base64 media from span payloads.
//!
//! Data URIs found in payload attributes are swapped for a reference string
//! before the span is exported; the decoded bytes are uploaded in the
//! background and tracked so a flush can wait for them.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::Utc;
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracelane_core::attributes::{
    is_maskable_attribute, OBSERVATION_INPUT, OBSERVATION_METADATA, OBSERVATION_OUTPUT,
    TRACE_INPUT, TRACE_METADATA, TRACE_OUTPUT,
};
use tracelane_core::{AttributeValue, SpanData};

use crate::client::{MediaUploadReport, MediaUploadRequest};
use crate::pending::PendingTasks;
use crate::{TracelaneClient, TracelaneError};

const MEDIA_ID_LEN: usize = 22;

fn data_uri_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"data:([A-Za-z0-9.+-]+/[A-Za-z0-9.+-]+);base64,([A-Za-z0-9+/]+={0,2})")
            .expect("data uri pattern is valid")
    })
}

/// Reference written in place of an extracted data URI.
pub fn media_reference(content_type: &str, media_id: &str) -> String {
    format!("@@@tracelaneMedia:type={content_type}|id={media_id}|source=base64_data_uri@@@")
}

#[derive(Clone, Debug)]
struct MediaUpload {
    media_id: String,
    trace_id: String,
    observation_id: String,
    field: String,
    content_type: String,
    sha256_hash: String,
    bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct MediaService {
    client: TracelaneClient,
    uploads: PendingTasks,
    permits: Arc<Semaphore>,
}

impl MediaService {
    pub fn new(client: TracelaneClient, max_concurrent_uploads: usize) -> Self {
        Self {
            client,
            uploads: PendingTasks::new(),
            permits: Arc::new(Semaphore::new(max_concurrent_uploads.max(1))),
        }
    }

    /// Replaces embedded media in payload attributes with references and
    /// schedules the uploads. Returns without waiting for any upload.
    pub fn process(&self, span: &mut SpanData) {
        let mut scheduled = HashSet::new();
        let trace_id = span.trace_id().to_string();
        let observation_id = span.span_id().to_string();

        for (key, value) in span.attributes.iter_mut() {
            if !is_maskable_attribute(key) {
                continue;
            }
            let AttributeValue::String(text) = value else {
                continue;
            };
            if !text.contains(";base64,") {
                continue;
            }

            let (rewritten, found) = extract_media(text);
            *text = rewritten;
            for media in found {
                if !scheduled.insert(media.media_id.clone()) {
                    continue;
                }
                self.schedule(MediaUpload {
                    media_id: media.media_id,
                    trace_id: trace_id.clone(),
                    observation_id: observation_id.clone(),
                    field: field_for(key).to_string(),
                    content_type: media.content_type,
                    sha256_hash: media.sha256_hash,
                    bytes: media.bytes,
                });
            }
        }
    }

    /// Waits for uploads in flight at the time of the call.
    pub async fn flush(&self) {
        self.uploads.wait().await;
    }

    pub fn pending_uploads(&self) -> usize {
        self.uploads.len()
    }

    fn schedule(&self, upload: MediaUpload) {
        let client = self.client.clone();
        let permits = self.permits.clone();
        self.uploads.spawn("media_upload", async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let media_id = upload.media_id.clone();
            if let Err(err) = upload_media(&client, upload).await {
                tracing::warn!(media_id = %media_id, error = %err, "media upload failed");
            }
        });
    }
}

async fn upload_media(client: &TracelaneClient, upload: MediaUpload) -> Result<(), TracelaneError> {
    let slot = client
        .create_media_upload(&MediaUploadRequest {
            trace_id: upload.trace_id,
            observation_id: Some(upload.observation_id),
            content_type: upload.content_type.clone(),
            content_length: upload.bytes.len(),
            sha256_hash: upload.sha256_hash.clone(),
            field: upload.field,
        })
        .await?;

    let Some(upload_url) = slot.upload_url else {
        tracing::debug!(media_id = %slot.media_id, "media already stored; skipping upload");
        return Ok(());
    };

    let started = Instant::now();
    let result = client
        .upload_media_bytes(
            &upload_url,
            &upload.content_type,
            &upload.sha256_hash,
            upload.bytes,
        )
        .await;
    let (upload_http_status, upload_http_error) = match &result {
        Ok(status) => (status.as_u16(), None),
        Err(TracelaneError::Http { status, body }) => (status.as_u16(), Some(body.clone())),
        Err(err) => (0, Some(err.to_string())),
    };

    client
        .report_media_upload(
            &slot.media_id,
            &MediaUploadReport {
                uploaded_at: Utc::now(),
                upload_http_status,
                upload_http_error,
                upload_time_ms: started.elapsed().as_millis() as u64,
            },
        )
        .await?;

    result.map(|_| ())
}

#[derive(Debug)]
struct ExtractedMedia {
    content_type: String,
    media_id: String,
    sha256_hash: String,
    bytes: Vec<u8>,
}

/// Returns the text with every decodable data URI replaced by its
/// reference, plus the decoded payloads in order of appearance.
fn extract_media(text: &str) -> (String, Vec<ExtractedMedia>) {
    let mut found = Vec::new();
    let rewritten = data_uri_pattern().replace_all(text, |caps: &regex::Captures<'_>| {
        let content_type = &caps[1];
        match STANDARD.decode(&caps[2]) {
            Ok(bytes) => {
                let digest = Sha256::digest(&bytes);
                let media_id = media_id_for(&digest);
                let reference = media_reference(content_type, &media_id);
                found.push(ExtractedMedia {
                    content_type: content_type.to_string(),
                    media_id,
                    sha256_hash: STANDARD.encode(digest),
                    bytes,
                });
                reference
            }
            Err(err) => {
                tracing::warn!(content_type, error = %err, "undecodable base64 media left in place");
                caps[0].to_string()
            }
        }
    });
    (rewritten.into_owned(), found)
}

fn media_id_for(digest: &[u8]) -> String {
    let mut encoded = URL_SAFE_NO_PAD.encode(digest);
    encoded.truncate(MEDIA_ID_LEN);
    encoded
}

fn field_for(key: &str) -> &'static str {
    let under = |root: &str| {
        key == root
            || key
                .strip_prefix(root)
                .is_some_and(|rest| rest.starts_with('.'))
    };
    // Metadata children may themselves be named `input*` or `output*`.
    if under(TRACE_METADATA) || under(OBSERVATION_METADATA) {
        "metadata"
    } else if under(TRACE_INPUT) || under(OBSERVATION_INPUT) {
        "input"
    } else if under(TRACE_OUTPUT) || under(OBSERVATION_OUTPUT) {
        "output"
    } else {
        "metadata"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_replaces_data_uris() {
        let payload = format!(
            "{{\"image\":\"data:image/png;base64,{}\",\"text\":\"hi\"}}",
            STANDARD.encode(b"png-bytes")
        );
        let (rewritten, found) = extract_media(&payload);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content_type, "image/png");
        assert_eq!(found[0].bytes, b"png-bytes");
        assert!(!rewritten.contains(";base64,"));
        assert!(rewritten.contains("@@@tracelaneMedia:type=image/png|id="));
        assert!(rewritten.contains("\"text\":\"hi\""));
    }

    #[test]
    fn media_ids_are_content_addressed() {
        let a = media_id_for(&Sha256::digest(b"same"));
        let b = media_id_for(&Sha256::digest(b"same"));
        let c = media_id_for(&Sha256::digest(b"other"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), MEDIA_ID_LEN);
    }

    #[test]
    fn invalid_base64_is_left_in_place() {
        let payload = "data:image/png;base64,abc";
        let (rewritten, found) = extract_media(payload);
        assert!(found.is_empty());
        assert_eq!(rewritten, payload);
    }

    #[test]
    fn field_is_derived_from_attribute_key() {
        assert_eq!(field_for("tracelane.observation.input"), "input");
        assert_eq!(field_for("tracelane.trace.output"), "output");
        assert_eq!(field_for("tracelane.trace.metadata.image"), "metadata");
    }

    #[test]
    fn metadata_children_named_like_payloads_stay_metadata() {
        assert_eq!(
            field_for("tracelane.observation.metadata.input_image"),
            "metadata"
        );
        assert_eq!(field_for("tracelane.trace.metadata.output"), "metadata");
        assert_eq!(field_for("tracelane.observation.output"), "output");
    }
}
