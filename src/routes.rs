use std::sync::Arc;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, Path, Query, State},
    http::request::Parts,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::listing::{ArticleDetail, ArticleList, ArticleView, Listing, Page, ThemeView, UserInfo};
use crate::models::{NewNote, Note, Toggle};

/// Header carrying the login session issued by the auth service.
pub const SESSION_HEADER: &str = "sessionid";

pub struct AppState {
    pub listing: Listing,
}

/// The user behind the request's `sessionid` header.
pub struct CurrentUser(pub String);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let session_id = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(AppError::Unauthorized)?;

        let user_id = state
            .listing
            .resolve_session(session_id)
            .await?
            .ok_or(AppError::Unauthorized)?;

        Ok(CurrentUser(user_id))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub page: Option<String>,
    pub theme_id: Option<String>,
    pub keyword: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TargetBody {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteBody {
    pub id: String,
    pub dom_index: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub operator: Toggle,
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

// Route handlers
pub async fn project_list(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<ArticleList>, AppError> {
    let list = state
        .listing
        .list_articles(
            &user_id,
            Page::parse(query.page.as_deref()),
            query.theme_id.as_deref(),
            query.keyword.as_deref(),
        )
        .await?;
    Ok(Json(list))
}

pub async fn project_detail(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ArticleDetail>, AppError> {
    let detail = state.listing.article_detail(&user_id, &id).await?;
    Ok(Json(detail))
}

pub async fn project_toggle_collect(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    body: Result<Json<TargetBody>, JsonRejection>,
) -> Result<Json<ToggleResponse>, AppError> {
    let target = json_body(body)?;
    let operator = state
        .listing
        .toggle_article_collect(&user_id, &target.id)
        .await?;
    Ok(Json(ToggleResponse { operator }))
}

pub async fn project_note(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    body: Result<Json<NoteBody>, JsonRejection>,
) -> Result<Json<ToggleResponse>, AppError> {
    let body = json_body(body)?;
    let operator = state
        .listing
        .toggle_note(NewNote {
            user_id,
            article_id: body.id,
            dom_index: body.dom_index,
            text: body.text,
            note: body.note,
        })
        .await?;
    Ok(Json(ToggleResponse { operator }))
}

pub async fn theme_list(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<ThemeView>>, AppError> {
    let themes = state
        .listing
        .list_themes(&user_id, Page::parse(query.page.as_deref()))
        .await?;
    Ok(Json(themes))
}

pub async fn theme_toggle_collect(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    body: Result<Json<TargetBody>, JsonRejection>,
) -> Result<Json<ToggleResponse>, AppError> {
    let target = json_body(body)?;
    let operator = state
        .listing
        .toggle_theme_collect(&user_id, &target.id)
        .await?;
    Ok(Json(ToggleResponse { operator }))
}

pub async fn user_info(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<UserInfo>, AppError> {
    Ok(Json(state.listing.user_info(&user_id).await?))
}

pub async fn project_collect_list(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<ArticleView>>, AppError> {
    let articles = state
        .listing
        .list_collected_articles(&user_id, Page::parse(query.page.as_deref()))
        .await?;
    Ok(Json(articles))
}

pub async fn project_note_list(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<Note>>, AppError> {
    let notes = state
        .listing
        .list_notes(&user_id, Page::parse(query.page.as_deref()))
        .await?;
    Ok(Json(notes))
}

pub async fn theme_collect_list(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<ThemeView>>, AppError> {
    let themes = state
        .listing
        .list_collected_themes(&user_id, Page::parse(query.page.as_deref()))
        .await?;
    Ok(Json(themes))
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/project/list", get(project_list))
        .route("/api/project/detail/:id", get(project_detail))
        .route("/api/project/toggleCollect", post(project_toggle_collect))
        .route("/api/project/note", post(project_note))
        .route("/api/theme/list", get(theme_list))
        .route("/api/theme/toggleCollect", post(theme_toggle_collect))
        .route("/api/user/info", get(user_info))
        .route("/api/projectCollect/list", get(project_collect_list))
        .route("/api/projectNote/list", get(project_note_list))
        .route("/api/themeCollect/list", get(theme_collect_list))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
