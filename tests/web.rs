mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{pattern, png_bytes, FakeEmbedder, Workspace, BROKEN_WIDTH};
use facematch::storage::{self, EmbeddingStore};
use facematch::{producer, web};
use image::RgbImage;
use tower::ServiceExt;

const BOUNDARY: &str = "facematch-test-boundary";

fn multipart(field: &str, file_name: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, field, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> Result<(StatusCode, String)> {
    let resp = app.clone().oneshot(req).await?;
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await?;
    Ok((status, String::from_utf8_lossy(&bytes).into_owned()))
}

/// Two identities, one image each, embedded with the fake model.
fn two_identity_app(ws: &Workspace) -> Result<(Router, FakeEmbedder)> {
    ws.add_known("alice", "1.png", &pattern(11))?;
    ws.add_known("bob", "1.png", &pattern(97))?;
    producer::run(&mut FakeEmbedder::default(), &ws.gallery, &ws.store)?;

    let store = storage::load(&ws.store)?;
    let model = FakeEmbedder::default();
    let state = web::AppState::new(store, model.clone(), &ws.config());
    Ok((web::router(state), model))
}

#[tokio::test]
async fn test_get_renders_form() -> Result<()> {
    let ws = Workspace::new()?;
    let (app, _) = two_identity_app(&ws)?;

    let req = Request::builder().uri("/").body(Body::empty())?;
    let (status, html) = send(&app, req).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("enctype=\"multipart/form-data\""));
    assert!(html.contains("name=\"image\""));
    Ok(())
}

#[tokio::test]
async fn test_exact_match_ranks_first() -> Result<()> {
    let ws = Workspace::new()?;
    let (app, model) = two_identity_app(&ws)?;

    let probe = png_bytes(&pattern(11))?;
    let (status, html) = send(&app, multipart("image", "probe.png", &probe)).await?;
    assert_eq!(status, StatusCode::OK);

    let alice = html.find("<strong>alice</strong>").expect("alice listed");
    let bob = html.find("<strong>bob</strong>").expect("bob listed");
    assert!(alice < bob, "alice should rank first");
    assert_eq!(html.matches("class=\"match\"").count(), 2);
    assert!(html.contains("100.00%"));
    assert!(html.contains("src=\"/static/known/alice/1.png\""));
    assert_eq!(model.calls(), 1);

    assert!(ws.public.join("uploads/probe.png").exists());
    assert!(ws.public.join("known/alice/1.png").exists());
    assert!(ws.public.join("known/bob/1.png").exists());

    // published gallery image is served
    let req = Request::builder()
        .uri("/static/known/alice/1.png")
        .body(Body::empty())?;
    let (status, _) = send(&app, req).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_no_face_is_error_page_and_server_survives() -> Result<()> {
    let ws = Workspace::new()?;
    let (app, _) = two_identity_app(&ws)?;

    let dark = png_bytes(&RgbImage::new(16, 16))?;
    let (status, html) = send(&app, multipart("image", "dark.png", &dark)).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("No face detected in the uploaded image."));
    assert!(!html.contains("Top matches"));

    let probe = png_bytes(&pattern(97))?;
    let (status, html) = send(&app, multipart("image", "next.png", &probe)).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("Top matches"));
    Ok(())
}

#[tokio::test]
async fn test_model_error_is_reported() -> Result<()> {
    let ws = Workspace::new()?;
    let (app, _) = two_identity_app(&ws)?;

    let broken = png_bytes(&RgbImage::new(BROKEN_WIDTH, 16))?;
    let (status, html) = send(&app, multipart("image", "broken.png", &broken)).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("An error occurred: simulated model failure"));
    Ok(())
}

#[tokio::test]
async fn test_malformed_uploads_never_reach_model() -> Result<()> {
    let ws = Workspace::new()?;
    let (app, model) = two_identity_app(&ws)?;
    let probe = png_bytes(&pattern(11))?;

    let (status, html) = send(&app, multipart("other", "probe.png", &probe)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(html.contains("Please select an image to upload."));

    let (status, html) = send(&app, multipart("image", "", &probe)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(html.contains("Please select an image to upload."));

    let (status, html) = send(&app, multipart("image", "junk.png", b"not an image")).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(html.contains("not a readable image"));

    let req = Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("hello"))?;
    let (status, _) = send(&app, req).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(model.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_upload_name_is_sanitized() -> Result<()> {
    let ws = Workspace::new()?;
    let (app, _) = two_identity_app(&ws)?;

    let probe = png_bytes(&pattern(11))?;
    let (status, html) = send(&app, multipart("image", "../../evil name.png", &probe)).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("/static/uploads/evil_name.png"));
    assert!(ws.public.join("uploads/evil_name.png").exists());
    assert!(!ws.dir.path().join("evil name.png").exists());
    Ok(())
}

#[tokio::test]
async fn test_empty_store_gives_zero_matches() -> Result<()> {
    let ws = Workspace::new()?;
    let state = web::AppState::new(EmbeddingStore::default(), FakeEmbedder::default(), &ws.config());
    let app = web::router(state);

    let probe = png_bytes(&pattern(11))?;
    let (status, html) = send(&app, multipart("image", "probe.png", &probe)).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("No known faces to compare against."));
    Ok(())
}

#[tokio::test]
async fn test_top_k_limits_results() -> Result<()> {
    let ws = Workspace::new()?;
    for (i, name) in ["a", "b", "c", "d", "e", "f"].iter().enumerate() {
        ws.add_known(name, "1.png", &pattern(i as u8 * 31 + 5))?;
    }
    producer::run(&mut FakeEmbedder::default(), &ws.gallery, &ws.store)?;
    let store = storage::load(&ws.store)?;
    assert_eq!(store.len(), 6);

    let app = web::router(web::AppState::new(store, FakeEmbedder::default(), &ws.config()));
    let probe = png_bytes(&pattern(5))?;
    let (_, html) = send(&app, multipart("image", "probe.png", &probe)).await?;
    assert_eq!(html.matches("class=\"match\"").count(), 4);
    Ok(())
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() -> Result<()> {
    let ws = Workspace::new()?;
    ws.add_known("alice", "1.png", &pattern(11))?;
    producer::run(&mut FakeEmbedder::default(), &ws.gallery, &ws.store)?;

    let cfg = facematch::config::Config {
        max_upload_bytes: 256,
        ..ws.config()
    };
    let model = FakeEmbedder::default();
    let app = web::router(web::AppState::new(storage::load(&ws.store)?, model.clone(), &cfg));

    let big = png_bytes(&RgbImage::from_fn(64, 64, |x, y| {
        image::Rgb([(x * 7 ^ y * 13) as u8, (x * y) as u8, (x + y * 31) as u8])
    }))?;
    assert!(big.len() > cfg.max_upload_bytes);

    let (status, html) = send(&app, multipart("image", "big.png", &big)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(html.contains("Could not read the upload"));
    assert!(html.contains("enctype=\"multipart/form-data\""));
    assert_eq!(model.calls(), 0);
    assert!(!ws.public.join("uploads/big.png").exists());
    Ok(())
}
