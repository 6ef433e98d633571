use actix_web::{web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{admin_validator, customer_validator, touch_customer, AuthUser},
    coupon::{self, CouponFilter, CouponInput, CouponView, Redeemer},
    customer,
    db::log_activity,
    error::{AppError, AppResult},
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/coupon/admin")
            .wrap(HttpAuthentication::bearer(admin_validator))
            .service(
                web::resource("/coupons")
                    .route(web::get().to(list_coupons))
                    .route(web::post().to(create_coupon)),
            )
            .service(
                web::resource("/coupons/{id}")
                    .route(web::get().to(coupon_detail))
                    .route(web::put().to(update_coupon))
                    .route(web::delete().to(delete_coupon)),
            ),
    )
    .service(
        web::resource("/coupon/validate")
            .wrap(HttpAuthentication::bearer(customer_validator))
            .route(web::post().to(validate)),
    )
    .service(
        web::resource("/coupon/available")
            .wrap(HttpAuthentication::bearer(customer_validator))
            .route(web::get().to(available)),
    );
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    code: String,
    subtotal: f64,
}

async fn validate(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<ValidateRequest>,
) -> AppResult<HttpResponse> {
    if !body.subtotal.is_finite() || body.subtotal < 0.0 {
        return Err(AppError::validation("Subtotal cannot be negative."));
    }
    touch_customer(&state.db, &auth.id).await;
    let redeemer = Redeemer {
        user_id: &auth.id,
        first_booking_used: customer::first_booking_used(&state.db, &auth.id).await?,
    };
    let quote = coupon::quote(&state.db, &body.code, &redeemer, body.subtotal).await?;
    Ok(HttpResponse::Ok().json(json!({
        "valid": true,
        "code": quote.coupon.code,
        "discountType": quote.coupon.discount_type,
        "discount": quote.discount,
        "total": coupon::round_money(body.subtotal - quote.discount),
    })))
}

async fn available(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> AppResult<HttpResponse> {
    let redeemer = Redeemer {
        user_id: &auth.id,
        first_booking_used: customer::first_booking_used(&state.db, &auth.id).await?,
    };
    Ok(HttpResponse::Ok().json(coupon::available_for(&state.db, &redeemer).await?))
}

async fn list_coupons(
    state: web::Data<AppState>,
    query: web::Query<CouponFilter>,
) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(coupon::list(&state.db, &query).await?))
}

async fn coupon_detail(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let found = coupon::find_by_id(&state.db, &path).await?;
    let mut view = CouponView::from(found);
    view.used_by = Some(coupon::usages(&state.db, &path).await?);
    Ok(HttpResponse::Ok().json(view))
}

async fn create_coupon(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<CouponInput>,
) -> AppResult<HttpResponse> {
    let draft = body.into_inner().into_draft()?;
    let created = coupon::insert(&state.db, draft).await?;
    log_activity(
        &state.db,
        "coupon_created",
        &format!("Coupon {} created", created.code),
        Some(&auth.id),
        None,
    )
    .await;
    Ok(HttpResponse::Created().json(CouponView::from(created)))
}

async fn update_coupon(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<CouponInput>,
) -> AppResult<HttpResponse> {
    let draft = body.into_inner().into_draft()?;
    let updated = coupon::update(&state.db, &path, draft).await?;
    log_activity(
        &state.db,
        "coupon_updated",
        &format!("Coupon {} updated", updated.code),
        Some(&auth.id),
        None,
    )
    .await;
    Ok(HttpResponse::Ok().json(CouponView::from(updated)))
}

async fn delete_coupon(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let outcome = coupon::remove(&state.db, &path).await?;
    log_activity(
        &state.db,
        "coupon_removed",
        &format!("Coupon {} {}", path.as_str(), outcome.as_str()),
        Some(&auth.id),
        None,
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({ "result": outcome })))
}
