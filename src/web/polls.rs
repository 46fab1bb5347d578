//! Poll endpoints

use crate::app_config;
use crate::db::with_deadline;
use crate::error::PollError;
use crate::identity::Identity;
use crate::orm::polls;
use crate::polls::{NewPoll, PollFilter, PollPatch, PollSort, PollStore};
use crate::results::{build_view, ResultsAggregator};
use crate::votes::{VoteLedger, VoterStatus};
use actix_web::{delete, get, patch, post, web, HttpResponse};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

pub(super) fn configure(conf: &mut web::ServiceConfig) {
    conf.service(create_poll)
        .service(list_polls)
        .service(view_poll)
        .service(update_poll)
        .service(delete_poll)
        .service(add_option)
        .service(cast_vote);
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize, Validate)]
pub struct CreatePollRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_public: bool,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Deserialize, Validate)]
pub struct UpdatePollRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    pub is_public: Option<bool>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize, Validate)]
pub struct AddOptionRequest {
    #[validate(length(min = 1, max = 100))]
    pub text: String,
}

#[derive(Deserialize)]
pub struct VoteRequest {
    pub option_id: i32,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub page: Option<u64>,
    pub size: Option<u64>,
    pub search: Option<String>,
    pub is_active: Option<bool>,
    pub owner_id: Option<i32>,
    #[serde(default)]
    pub mine: bool,
    #[serde(default)]
    pub sort: PollSort,
}

/// Poll without results, as returned by listings and updates
#[derive(Serialize)]
pub struct PollSummary {
    pub id: i32,
    pub title: String,
    pub description: Option<String>,
    pub owner_id: i32,
    pub is_public: bool,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

impl From<polls::Model> for PollSummary {
    fn from(poll: polls::Model) -> Self {
        Self {
            id: poll.id,
            title: poll.title,
            description: poll.description,
            owner_id: poll.owner_id,
            is_public: poll.is_public,
            is_active: poll.is_active,
            created_at: poll.created_at,
        }
    }
}

#[derive(Serialize)]
struct PollPageResponse {
    items: Vec<PollSummary>,
    total: u64,
    page: u64,
    size: u64,
    pages: u64,
    has_next: bool,
    has_prev: bool,
}

#[derive(Serialize)]
struct OptionResponse {
    id: i32,
    poll_id: i32,
    text: String,
}

#[derive(Serialize)]
struct VoteResponse {
    id: i32,
    poll_id: i32,
    option_id: i32,
    created_at: NaiveDateTime,
}

fn validate<T: Validate>(form: &T) -> Result<(), PollError> {
    form.validate().map_err(|e| {
        log::debug!("Request validation failed: {}", e);
        PollError::Validation(e.to_string())
    })
}

#[post("/api/v1/polls")]
async fn create_poll(
    caller: Identity,
    store: web::Data<PollStore>,
    form: web::Json<CreatePollRequest>,
) -> Result<HttpResponse, PollError> {
    validate(&*form)?;
    let form = form.into_inner();

    let created = with_deadline(
        app_config::server().request_timeout(),
        store.create(
            &caller,
            NewPoll {
                title: form.title,
                description: form.description,
                is_public: form.is_public,
                options: form.options,
            },
        ),
    )
    .await?;

    // A new poll has no votes yet.
    let view = build_view(created, &HashMap::new(), VoterStatus::default());
    Ok(HttpResponse::Created().json(view))
}

#[get("/api/v1/polls")]
async fn list_polls(
    caller: Identity,
    store: web::Data<PollStore>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, PollError> {
    let query = query.into_inner();
    let page = query.page.unwrap_or(1);
    let size = query.size.unwrap_or(store.limits().default_page_size);
    let filter = PollFilter {
        is_active: query.is_active,
        owner_id: query.owner_id,
        mine: query.mine,
        search: query.search,
        sort: query.sort,
    };

    let result = with_deadline(
        app_config::server().request_timeout(),
        store.list_page(&caller, &filter, page, size),
    )
    .await?;

    Ok(HttpResponse::Ok().json(PollPageResponse {
        items: result.items.into_iter().map(PollSummary::from).collect(),
        total: result.total,
        page: result.page,
        size: result.size,
        pages: result.pages,
        has_next: result.has_next,
        has_prev: result.has_prev,
    }))
}

#[get("/api/v1/polls/{poll_id}")]
async fn view_poll(
    caller: Identity,
    results: web::Data<ResultsAggregator>,
    path: web::Path<i32>,
) -> Result<HttpResponse, PollError> {
    let poll_id = path.into_inner();
    let view = with_deadline(
        app_config::server().request_timeout(),
        results.assemble(poll_id, &caller),
    )
    .await?;

    Ok(HttpResponse::Ok().json(view))
}

#[patch("/api/v1/polls/{poll_id}")]
async fn update_poll(
    caller: Identity,
    store: web::Data<PollStore>,
    path: web::Path<i32>,
    form: web::Json<UpdatePollRequest>,
) -> Result<HttpResponse, PollError> {
    validate(&*form)?;
    let poll_id = path.into_inner();
    let form = form.into_inner();
    let patch = PollPatch {
        title: form.title,
        description: form.description,
        is_public: form.is_public,
        is_active: form.is_active,
    };

    let updated = with_deadline(
        app_config::server().request_timeout(),
        store.update(poll_id, &caller, patch),
    )
    .await?;

    Ok(HttpResponse::Ok().json(PollSummary::from(updated)))
}

#[delete("/api/v1/polls/{poll_id}")]
async fn delete_poll(
    caller: Identity,
    store: web::Data<PollStore>,
    path: web::Path<i32>,
) -> Result<HttpResponse, PollError> {
    let poll_id = path.into_inner();
    with_deadline(
        app_config::server().request_timeout(),
        store.delete(poll_id, &caller),
    )
    .await?;

    Ok(HttpResponse::NoContent().finish())
}

#[post("/api/v1/polls/{poll_id}/options")]
async fn add_option(
    caller: Identity,
    store: web::Data<PollStore>,
    path: web::Path<i32>,
    form: web::Json<AddOptionRequest>,
) -> Result<HttpResponse, PollError> {
    validate(&*form)?;
    let poll_id = path.into_inner();

    let option = with_deadline(
        app_config::server().request_timeout(),
        store.add_option(poll_id, &caller, &form.text),
    )
    .await?;

    Ok(HttpResponse::Created().json(OptionResponse {
        id: option.id,
        poll_id: option.poll_id,
        text: option.text,
    }))
}

#[post("/api/v1/polls/{poll_id}/vote")]
async fn cast_vote(
    caller: Identity,
    ledger: web::Data<VoteLedger>,
    path: web::Path<i32>,
    form: web::Json<VoteRequest>,
) -> Result<HttpResponse, PollError> {
    let poll_id = path.into_inner();

    let vote = with_deadline(
        app_config::server().request_timeout(),
        ledger.cast(poll_id, form.option_id, &caller),
    )
    .await?;

    Ok(HttpResponse::Created().json(VoteResponse {
        id: vote.id,
        poll_id: vote.poll_id,
        option_id: vote.option_id,
        created_at: vote.created_at,
    }))
}
