//! Roster store service.
//!
//! Owns a directory of labeled enrollment images, one subdirectory per
//! enrolled name holding up to two reference JPEGs (`1.jpg`, `2.jpg`).
//! The daemon reads names and images from here and posts new enrollments;
//! nothing else ever writes to the directory.

use anyhow::{Context, Result};
use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::path::{Path, PathBuf};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

/// At most two reference images per name; once full, further submissions
/// overwrite slot 2.
const MAX_IMAGES_PER_NAME: usize = 2;

#[derive(Clone)]
struct AppState {
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let data_dir = std::env::var("ROSTER_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./labeled_images"));
    let bind = std::env::var("ROSTER_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    let app = Router::new()
        .route("/known-names", get(known_names))
        .route("/register", post(register))
        .route("/images/:name/:idx", get(reference_image))
        .layer(CorsLayer::permissive())
        .with_state(AppState {
            data_dir: data_dir.clone(),
        });

    tracing::info!(bind = %bind, data_dir = %data_dir.display(), "rollcall-rosterd listening");
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// GET /known-names — every enrolled name (one per subdirectory).
async fn known_names(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(list_names(&state.data_dir))
}

/// POST /register — multipart {name, image}. Stores the image in the
/// name's next free slot, or overwrites slot 2 when the cap is reached.
async fn register(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<String, (StatusCode, String)> {
    let mut name: Option<String> = None;
    let mut image: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("bad multipart: {e}")))?
    {
        let field_name = field.name().map(|s| s.to_string());
        match field_name.as_deref() {
            Some("name") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("bad name field: {e}")))?;
                name = Some(text);
            }
            Some("image") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("bad image field: {e}")))?;
                image = Some(bytes.to_vec());
            }
            _ => {}
        }
    }

    let name = name
        .as_deref()
        .and_then(sanitize_name)
        .ok_or((StatusCode::BAD_REQUEST, "missing or invalid name".into()))?;
    let image = image.ok_or((StatusCode::BAD_REQUEST, "no image uploaded".into()))?;

    let dir = state.data_dir.join(&name);
    std::fs::create_dir_all(&dir).map_err(internal)?;
    let slot = next_slot(&dir).map_err(internal)?;
    let path = dir.join(format!("{slot}.jpg"));
    std::fs::write(&path, &image).map_err(internal)?;

    tracing::info!(name = %name, slot, bytes = image.len(), "reference image saved");
    Ok("Saved successfully".to_string())
}

/// GET /images/{name}/{idx} — one stored reference JPEG.
async fn reference_image(
    State(state): State<AppState>,
    UrlPath((name, idx)): UrlPath<(String, u32)>,
) -> Result<impl IntoResponse, StatusCode> {
    let name = sanitize_name(&name).ok_or(StatusCode::BAD_REQUEST)?;
    if idx == 0 || idx as usize > MAX_IMAGES_PER_NAME {
        return Err(StatusCode::NOT_FOUND);
    }

    let path = state.data_dir.join(&name).join(format!("{idx}.jpg"));
    match std::fs::read(&path) {
        Ok(bytes) => Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "image read failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn internal(e: std::io::Error) -> (StatusCode, String) {
    tracing::warn!(error = %e, "storage failure");
    (StatusCode::INTERNAL_SERVER_ERROR, format!("storage: {e}"))
}

/// Enrolled names are the subdirectories of the data dir, in directory
/// order (which is also roster order everywhere downstream).
fn list_names(data_dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(data_dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}

/// Trim the submitted name and refuse anything that could escape the data
/// directory or collide with path syntax.
fn sanitize_name(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return None;
    }
    Some(name.to_string())
}

/// Slot for the next image: fill 1 then 2; once both exist, keep
/// overwriting slot 2.
fn next_slot(dir: &Path) -> std::io::Result<usize> {
    let existing = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "jpg")
                .unwrap_or(false)
        })
        .count();
    Ok(if existing < MAX_IMAGES_PER_NAME {
        existing + 1
    } else {
        MAX_IMAGES_PER_NAME
    })
}
