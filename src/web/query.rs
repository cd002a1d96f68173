//! One upload, start to finish:
//! `Received -> Detected | NoFaceDetected | DetectionError -> Scored -> Rendered`.

use facematch_vision::EmbedError;
use log::{info, warn};

use super::gallery;
use super::render::{url_path, RenderedMatch};
use super::upload::{sanitize_filename, save_upload};
use super::AppState;
use crate::error::QueryError;
use crate::matcher;

pub const NO_FILE: &str = "Please select an image to upload.";

#[derive(Debug)]
pub struct QueryReply {
    /// Sanitized name the upload was saved under, once it got that far.
    pub uploaded: Option<String>,
    pub result: Result<Vec<RenderedMatch>, QueryError>,
}

impl QueryReply {
    fn failed(uploaded: Option<String>, error: QueryError) -> Self {
        Self {
            uploaded,
            result: Err(error),
        }
    }
}

/// Run a query for an uploaded file. Blocks on the model.
pub fn run(state: &AppState, file_name: &str, bytes: &[u8]) -> QueryReply {
    if file_name.is_empty() || bytes.is_empty() {
        return QueryReply::failed(None, QueryError::MalformedUpload(NO_FILE.to_string()));
    }
    let Some(name) = sanitize_filename(file_name) else {
        return QueryReply::failed(
            None,
            QueryError::MalformedUpload(format!("Invalid file name {:?}.", file_name)),
        );
    };
    let img = match image::load_from_memory(bytes) {
        Ok(img) => img,
        Err(e) => {
            return QueryReply::failed(
                None,
                QueryError::MalformedUpload(format!(
                    "The uploaded file is not a readable image: {}",
                    e
                )),
            )
        }
    };

    // Received
    if let Err(e) = save_upload(&state.paths.uploads_dir(), &name, bytes) {
        return QueryReply::failed(None, QueryError::Io(e));
    }
    let uploaded = Some(name);

    let represented = {
        let mut model = state.embedder.lock().unwrap_or_else(|poisoned| {
            warn!("embedding model lock was poisoned by an earlier panic");
            poisoned.into_inner()
        });
        model.represent(&img, true)
    };
    let embedding = match represented {
        Ok(reps) => match reps.into_iter().next() {
            Some(rep) => rep.embedding,
            None => return QueryReply::failed(uploaded, QueryError::NoFaceDetected),
        },
        Err(EmbedError::NoFaceDetected) => {
            return QueryReply::failed(uploaded, QueryError::NoFaceDetected)
        }
        Err(EmbedError::Model(e)) => {
            return QueryReply::failed(uploaded, QueryError::Model(format!("{:#}", e)))
        }
    };

    // Scored
    let ranked = match matcher::rank(&embedding, state.store.records(), state.top_k) {
        Ok(ranked) => ranked,
        Err(e) => return QueryReply::failed(uploaded, e.into()),
    };

    let known_dir = state.paths.known_dir();
    let matches = ranked
        .into_iter()
        .map(|r| {
            match gallery::materialize(&state.paths.gallery_dir, &known_dir, &r.source_ref) {
                Ok(how) => log::debug!("{}: {:?}", r.source_ref, how),
                Err(e) => warn!("could not publish gallery image {}: {}", r.source_ref, e),
            }
            RenderedMatch {
                image_url: format!("/static/known/{}", url_path(&r.source_ref)),
                similarity_percent: r.similarity_percent(),
                similarity: r.similarity,
                identity: r.identity,
            }
        })
        .collect::<Vec<_>>();

    info!(
        "query {}: {} match(es), best {}",
        uploaded.as_deref().unwrap_or("-"),
        matches.len(),
        matches
            .first()
            .map(|m| format!("{} ({})", m.identity, m.similarity_percent))
            .unwrap_or_else(|| "none".to_string())
    );

    QueryReply {
        uploaded,
        result: Ok(matches),
    }
}
