//! `GET /work-categories/` (§6): read-only view onto the category catalog.
//! Catalog CRUD lives in an external collaborator (§1); the core only
//! needs enough of the catalog to validate `main_cat_code`/`sub_cat_code`
//! pairs (`repo::require_known_category`) and to let clients populate a
//! picker.

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::FromRow;

use crate::error::AppResult;
use crate::state::AppState;

#[derive(Debug, Serialize, FromRow)]
struct CategoryRow {
    main_cat_code: String,
    sub_cat_code: String,
    name: String,
}

pub async fn list_categories(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let rows = sqlx::query_as::<_, CategoryRow>(
        "SELECT main_cat_code, sub_cat_code, name FROM work_categories ORDER BY main_cat_code, sub_cat_code",
    )
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(json!({ "categories": rows })))
}
