use actix_web::{web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{admin_validator, any_validator, touch_customer, AuthUser},
    booking::{
        can_view,
        query::{self, BookingFilter, Scope},
        store::{self, NewBooking, PaymentUpdate, Reschedule, ReviewInput},
        Actor, BookingStatus,
    },
    error::{AppError, AppResult},
    models::Role,
    provider,
    push::{self, PushSubscriptionInput},
    routes::{announce, announce_status, no_content},
    state::AppState,
    templates::{render_csv, BookingReportTemplate},
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/booking/admin")
            .wrap(HttpAuthentication::bearer(admin_validator))
            .service(web::resource("/bookings").route(web::get().to(admin_list)))
            .service(web::resource("/booking-report").route(web::get().to(booking_report)))
            .service(
                web::resource("/{id}")
                    .route(web::get().to(admin_detail))
                    .route(web::delete().to(delete_booking)),
            )
            .service(web::resource("/{id}/candidates").route(web::get().to(candidates)))
            .service(web::resource("/{id}/assign").route(web::patch().to(assign)))
            .service(web::resource("/{id}/reschedule").route(web::patch().to(reschedule)))
            .service(web::resource("/{id}/status").route(web::patch().to(admin_status)))
            .service(web::resource("/{id}/payment").route(web::patch().to(payment))),
    )
    .service(
        web::scope("/booking")
            .wrap(HttpAuthentication::bearer(any_validator))
            .service(web::resource("").route(web::post().to(create)))
            .service(web::resource("/my").route(web::get().to(my_bookings)))
            .service(web::resource("/{id}").route(web::get().to(detail)))
            .service(web::resource("/{id}/cancel").route(web::patch().to(cancel)))
            .service(web::resource("/{id}/review").route(web::post().to(review)))
            .service(web::resource("/{id}/subscribe").route(web::post().to(subscribe))),
    );
}

/// The status-change actor for a signed-in user. Provider eligibility is read
/// fresh so a revoked KYC applies immediately.
pub(crate) async fn actor_for(state: &AppState, user: &AuthUser) -> AppResult<Actor> {
    Ok(match user.role {
        Role::Admin => Actor::Admin {
            id: user.id.clone(),
        },
        Role::Customer => Actor::Customer {
            id: user.id.clone(),
        },
        Role::Provider => Actor::Provider {
            id: user.id.clone(),
            eligible: provider::eligibility(&state.db, &user.id).await?,
        },
    })
}

async fn visible_booking(
    state: &AppState,
    user: &AuthUser,
    booking_id: &str,
) -> AppResult<crate::models::BookingRow> {
    let row = store::fetch_required(&state.db, booking_id).await?;
    if !can_view(&row, user) {
        return Err(AppError::Forbidden("You cannot access this booking.".into()));
    }
    Ok(row)
}

async fn create(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<NewBooking>,
) -> AppResult<HttpResponse> {
    auth.require(Role::Customer)?;
    let settings = state.settings.snapshot(&state.db).await?;
    let booking_id = store::create(&state.db, &settings, &auth.id, body.into_inner()).await?;
    log::info!("Booking {booking_id} created by {}", auth.id);

    announce(
        &state,
        "booking_created",
        &booking_id,
        &format!("New booking from {}", auth.name),
        &auth.id,
    )
    .await;
    Ok(HttpResponse::Created().json(store::detail(&state.db, &booking_id).await?))
}

async fn my_bookings(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    query: web::Query<BookingFilter>,
) -> AppResult<HttpResponse> {
    auth.require(Role::Customer)?;
    touch_customer(&state.db, &auth.id).await;
    let page = query::list(&state.db, Scope::Customer(&auth.id), &query).await?;
    Ok(HttpResponse::Ok().json(page))
}

async fn detail(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    visible_booking(&state, &auth, &path).await?;
    Ok(HttpResponse::Ok().json(store::detail(&state.db, &path).await?))
}

#[derive(Debug, Default, Deserialize)]
struct CancelRequest {
    reason: Option<String>,
}

async fn cancel(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: Option<web::Json<CancelRequest>>,
) -> AppResult<HttpResponse> {
    let booking_id = path.into_inner();
    visible_booking(&state, &auth, &booking_id).await?;
    let reason = body.map(web::Json::into_inner).unwrap_or_default().reason;
    let actor = actor_for(&state, &auth).await?;
    store::transition(
        &state.db,
        &booking_id,
        BookingStatus::Cancelled,
        &actor,
        reason.as_deref().map(str::trim).filter(|reason| !reason.is_empty()),
    )
    .await?;

    announce_status(&state, &booking_id, BookingStatus::Cancelled, &auth.id).await;
    Ok(HttpResponse::Ok().json(store::detail(&state.db, &booking_id).await?))
}

async fn review(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<ReviewInput>,
) -> AppResult<HttpResponse> {
    auth.require(Role::Customer)?;
    let booking_id = path.into_inner();
    store::review(&state.db, &booking_id, &auth.id, body.into_inner()).await?;
    announce(
        &state,
        "booking_reviewed",
        &booking_id,
        &format!("{} reviewed booking {booking_id}", auth.name),
        &auth.id,
    )
    .await;
    Ok(HttpResponse::Ok().json(store::detail(&state.db, &booking_id).await?))
}

async fn subscribe(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<PushSubscriptionInput>,
) -> AppResult<HttpResponse> {
    visible_booking(&state, &auth, &path).await?;
    push::store_subscription(&state.db, &path, body.into_inner()).await?;
    Ok(HttpResponse::Created().json(json!({
        "subscribed": true,
        "publicKey": state.push.public_key,
        "pushEnabled": state.push.enabled(),
    })))
}

async fn admin_list(
    state: web::Data<AppState>,
    query: web::Query<BookingFilter>,
) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(query::list(&state.db, Scope::All, &query).await?))
}

async fn booking_report(
    state: web::Data<AppState>,
    query: web::Query<BookingFilter>,
) -> AppResult<HttpResponse> {
    let rows = query::report_rows(&state.db, &query).await?;
    let range = match (query.start_date.as_deref(), query.end_date.as_deref()) {
        (Some(start), Some(end)) => format!("{start}_to_{end}"),
        (Some(start), None) => format!("from_{start}"),
        (None, Some(end)) => format!("until_{end}"),
        (None, None) => "all".to_string(),
    };
    let filename: String = format!("bookings_{range}.csv")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect();
    Ok(render_csv(BookingReportTemplate::new(rows), &filename))
}

async fn admin_detail(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(store::detail(&state.db, &path).await?))
}

async fn delete_booking(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let booking_id = path.into_inner();
    store::delete(&state.db, &booking_id).await?;
    crate::db::log_activity(
        &state.db,
        "booking_deleted",
        &format!("Booking {booking_id} deleted"),
        Some(&auth.id),
        None,
    )
    .await;
    Ok(no_content())
}

async fn candidates(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let booking = store::fetch_required(&state.db, &path).await?;
    Ok(HttpResponse::Ok().json(provider::candidates(&state.db, &booking).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignRequest {
    provider_id: String,
}

async fn assign(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<AssignRequest>,
) -> AppResult<HttpResponse> {
    let booking_id = path.into_inner();
    let provider_id = body.provider_id.trim();
    let assignment = store::assign_provider(&state.db, &booking_id, provider_id).await?;
    if !assignment.eligible {
        log::warn!(
            "Booking {booking_id} assigned to provider {provider_id} without approved KYC or a passed test"
        );
    }

    announce(
        &state,
        "booking_assigned",
        &booking_id,
        &format!("Booking {booking_id} assigned to provider {provider_id}"),
        &auth.id,
    )
    .await;
    push::notify_booking(&state, &booking_id, "Provider assigned", "A technician has been assigned to your booking.")
        .await;
    Ok(HttpResponse::Ok().json(store::detail(&state.db, &booking_id).await?))
}

async fn reschedule(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<Reschedule>,
) -> AppResult<HttpResponse> {
    let booking_id = path.into_inner();
    let settings = state.settings.snapshot(&state.db).await?;
    store::reschedule(&state.db, &settings, &booking_id, body.into_inner()).await?;

    announce(
        &state,
        "booking_rescheduled",
        &booking_id,
        &format!("Booking {booking_id} rescheduled"),
        &auth.id,
    )
    .await;
    push::notify_booking(&state, &booking_id, "Booking rescheduled", "Your booking has a new schedule.")
        .await;
    Ok(HttpResponse::Ok().json(store::detail(&state.db, &booking_id).await?))
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusRequest {
    pub status: BookingStatus,
    pub note: Option<String>,
}

async fn admin_status(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<StatusRequest>,
) -> AppResult<HttpResponse> {
    let booking_id = path.into_inner();
    let actor = Actor::Admin {
        id: auth.id.clone(),
    };
    store::transition(&state.db, &booking_id, body.status, &actor, body.note.as_deref()).await?;
    announce_status(&state, &booking_id, body.status, &auth.id).await;
    Ok(HttpResponse::Ok().json(store::detail(&state.db, &booking_id).await?))
}

async fn payment(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<PaymentUpdate>,
) -> AppResult<HttpResponse> {
    let booking_id = path.into_inner();
    let input = body.into_inner();
    let status = input.status;
    store::update_payment(&state.db, &booking_id, input).await?;
    announce(
        &state,
        "payment_updated",
        &booking_id,
        &format!("Payment for booking {booking_id} marked {}", status.as_str()),
        &auth.id,
    )
    .await;
    Ok(HttpResponse::Ok().json(store::detail(&state.db, &booking_id).await?))
}
