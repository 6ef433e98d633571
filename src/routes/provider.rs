use actix_web::{web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use serde_json::json;

use crate::{
    auth::{provider_validator, AuthUser},
    booking::{
        query::{self, BookingFilter, Scope},
        store, Actor,
    },
    db::log_activity,
    error::AppResult,
    provider::{self, BankDetails, KycSubmission, ProfileUpdate, TestSubmission},
    routes::{announce_status, booking::StatusRequest},
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/provider")
            .wrap(HttpAuthentication::bearer(provider_validator))
            .service(web::resource("/dashboard").route(web::get().to(dashboard)))
            .service(web::resource("/bookings").route(web::get().to(bookings)))
            .service(web::resource("/bookings/{id}/status").route(web::patch().to(update_status)))
            .service(web::resource("/profile").route(web::put().to(update_profile)))
            .service(web::resource("/kyc").route(web::post().to(submit_kyc)))
            .service(web::resource("/test").route(web::post().to(submit_test)))
            .service(web::resource("/bank").route(web::put().to(update_bank))),
    );
}

async fn dashboard(state: web::Data<AppState>, auth: web::ReqData<AuthUser>) -> AppResult<HttpResponse> {
    let profile = provider::view(&state.db, &auth.id).await?;
    let stats = query::status_counts(&state.db, Some(&auth.id)).await?;
    let upcoming = query::list(
        &state.db,
        Scope::Provider(&auth.id),
        &BookingFilter {
            status: Some("accepted".into()),
            limit: Some(5),
            ..Default::default()
        },
    )
    .await?;
    Ok(HttpResponse::Ok().json(json!({
        "profile": profile,
        "stats": stats,
        "upcoming": upcoming.items,
    })))
}

async fn bookings(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    query: web::Query<BookingFilter>,
) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(query::list(&state.db, Scope::Provider(&auth.id), &query).await?))
}

async fn update_status(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<StatusRequest>,
) -> AppResult<HttpResponse> {
    let booking_id = path.into_inner();
    let actor = Actor::Provider {
        id: auth.id.clone(),
        eligible: provider::eligibility(&state.db, &auth.id).await?,
    };
    store::transition(&state.db, &booking_id, body.status, &actor, body.note.as_deref()).await?;
    announce_status(&state, &booking_id, body.status, &auth.id).await;
    Ok(HttpResponse::Ok().json(store::detail(&state.db, &booking_id).await?))
}

async fn update_profile(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<ProfileUpdate>,
) -> AppResult<HttpResponse> {
    provider::update_profile(&state.db, &auth.id, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(provider::view(&state.db, &auth.id).await?))
}

async fn submit_kyc(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<KycSubmission>,
) -> AppResult<HttpResponse> {
    provider::submit_kyc(&state.db, &auth.id, body.into_inner()).await?;
    log_activity(
        &state.db,
        "kyc_submitted",
        &format!("{} submitted KYC documents", auth.name),
        Some(&auth.id),
        None,
    )
    .await;
    Ok(HttpResponse::Ok().json(provider::view(&state.db, &auth.id).await?))
}

async fn submit_test(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<TestSubmission>,
) -> AppResult<HttpResponse> {
    let result = provider::grade(&body, state.config.provider_test_pass_ratio)?;
    provider::record_test(&state.db, &auth.id, &result).await?;
    log_activity(
        &state.db,
        "test_taken",
        &format!(
            "{} scored {:.0}% on the qualification test",
            auth.name,
            result.score * 100.0
        ),
        Some(&auth.id),
        None,
    )
    .await;
    Ok(HttpResponse::Ok().json(result))
}

async fn update_bank(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<BankDetails>,
) -> AppResult<HttpResponse> {
    provider::set_bank(&state.db, &auth.id, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(provider::view(&state.db, &auth.id).await?))
}
