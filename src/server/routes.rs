use super::error::AppError;
use crate::app::AppData;
use crate::config::ProjectConfig;
use axum::{
    body::to_bytes,
    extract::{ConnectInfo, Path, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;

/// Bodies of `/api/incr` are a single small JSON object.
const MAX_BODY_BYTES: usize = 4 * 1024;

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

/// The client address. Proxy headers are only read when `trust_proxy` is set; otherwise the
/// socket peer is used.
fn visitor_of(request: &Request, trust_proxy: bool) -> Option<String> {
    let peer = || {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    };
    if !trust_proxy {
        return peer();
    }

    let headers = request.headers();
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    forwarded.or(real_ip).map(str::to_string).or_else(peer)
}

fn slug_of(body: &[u8]) -> Result<String, AppError> {
    let payload: serde_json::Value =
        serde_json::from_slice(body).map_err(|_| AppError::MalformedPayload)?;
    if !payload.is_object() {
        return Err(AppError::MalformedPayload);
    }

    payload
        .get("slug")
        .and_then(serde_json::Value::as_str)
        .filter(|slug| !slug.is_empty())
        .map(str::to_string)
        .ok_or(AppError::MissingSlug)
}

/// `POST /api/incr` with `{ "slug": "..." }`. Answers `202` with the new view count.
pub async fn register_view(
    State(data): State<AppData>,
    request: Request,
) -> Result<impl IntoResponse, AppError> {
    if !is_json(request.headers()) {
        return Err(AppError::UnsupportedContentType);
    }

    let visitor = if data.config.dedup_views {
        visitor_of(&request, data.config.trust_proxy)
    } else {
        None
    };

    let body = to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|_| AppError::MalformedPayload)?;
    let slug = slug_of(&body)?;

    let count = data
        .counter
        .try_increment_view(&slug, visitor.as_deref())
        .await
        .map_err(|err| AppError::internal(err, data.config.production))?;

    tracing::debug!("[Views] `{slug}` now has {count} views");
    Ok((StatusCode::ACCEPTED, Json(count)))
}

pub async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

#[derive(Serialize, Debug)]
pub struct ProjectStats {
    pub slug: String,
    pub repository: Option<String>,
    pub views: u64,
    pub stars: Option<u64>,
}

/// `GET /api/projects`: views and stars of every published project.
pub async fn list_projects(
    State(data): State<AppData>,
) -> Result<Json<Vec<ProjectStats>>, AppError> {
    let projects: Vec<&ProjectConfig> = data
        .config
        .projects
        .iter()
        .filter(|project| project.published)
        .collect();
    let slugs: Vec<&str> = projects.iter().map(|p| p.slug.as_str()).collect();
    let repositories: Vec<&str> = projects
        .iter()
        .filter_map(|p| p.repository.as_deref())
        .collect();

    let (views, stars) = tokio::try_join!(
        data.counter.get_counts(&slugs),
        data.stars.get_many_stars(&repositories, data.stars_ttl()),
    )
    .map_err(|err| AppError::internal(err, data.config.production))?;

    let stats = projects
        .into_iter()
        .map(|project| ProjectStats {
            slug: project.slug.clone(),
            repository: project.repository.clone(),
            views: views.get(&project.slug).copied().unwrap_or(0),
            stars: project
                .repository
                .as_ref()
                .and_then(|repo| stars.get(repo).copied().flatten()),
        })
        .collect();

    Ok(Json(stats))
}

/// `GET /api/projects/{slug}`: views and stars of one catalog project.
pub async fn project_stats(
    State(data): State<AppData>,
    Path(slug): Path<String>,
) -> Result<Json<ProjectStats>, AppError> {
    let project = data
        .config
        .projects
        .iter()
        .find(|project| project.slug == slug)
        .ok_or(AppError::NotFound)?;

    let internal = |err| AppError::internal(err, data.config.production);
    let views = data.counter.get_count(&project.slug).await.map_err(internal)?;
    let stars = match project.repository.as_deref() {
        Some(repo) => data
            .stars
            .get_stars(repo, data.stars_ttl())
            .await
            .map_err(internal)?,
        None => None,
    };

    Ok(Json(ProjectStats {
        slug: project.slug.clone(),
        repository: project.repository.clone(),
        views,
        stars,
    }))
}

pub async fn health() -> &'static str {
    "OK"
}
