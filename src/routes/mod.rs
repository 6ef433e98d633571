pub mod admin;
pub mod auth;
pub mod booking;
pub mod catalog;
pub mod coupon;
pub mod events;
pub mod provider;
pub mod public;

use actix_web::{error::InternalError, web, HttpResponse};

use crate::{booking::store, db::log_activity, error::AppError, push, state::AppState};

/// Registers every route. Admin scopes come before the public scopes that
/// share their prefix, since a matched scope does not fall through.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.configure(auth::configure)
        .configure(catalog::configure)
        .configure(coupon::configure)
        .configure(booking::configure)
        .configure(provider::configure)
        .configure(admin::configure)
        .configure(events::configure)
        .configure(public::configure);
}

pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(64 * 1024)
        .error_handler(|err, _req| {
            let response = AppError::validation(format!("Invalid request body: {err}"));
            InternalError::from_response(err, actix_web::ResponseError::error_response(&response))
                .into()
        })
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| {
        let response = AppError::validation(format!("Invalid query string: {err}"));
        InternalError::from_response(err, actix_web::ResponseError::error_response(&response)).into()
    })
}

/// Post-commit side effects of a booking change: live event and audit line.
/// Failures are logged and never reach the caller.
pub(crate) async fn announce(
    state: &AppState,
    kind: &str,
    booking_id: &str,
    message: &str,
    actor_id: &str,
) {
    match store::fetch(&state.db, booking_id).await {
        Ok(Some(row)) => state.publish(kind, row),
        Ok(None) => {}
        Err(err) => log::warn!("Could not load booking {booking_id} for {kind} event: {err}"),
    }
    log_activity(&state.db, kind, message, Some(actor_id), Some(booking_id)).await;
}

/// Like [`announce`], plus a push notification to the booking's subscribers.
pub(crate) async fn announce_status(
    state: &AppState,
    booking_id: &str,
    status: crate::booking::BookingStatus,
    actor_id: &str,
) {
    let message = format!("Booking {booking_id} is now {status}");
    announce(state, "booking_status", booking_id, &message, actor_id).await;
    push::notify_booking(state, booking_id, "Booking update", &message).await;
}

pub(crate) fn no_content() -> HttpResponse {
    HttpResponse::NoContent().finish()
}

#[cfg(test)]
pub(crate) mod testing {
    use actix_web::{
        body::MessageBody,
        dev::{Service, ServiceFactory, ServiceRequest, ServiceResponse},
        http::StatusCode,
        test, web, App, Error,
    };

    use crate::state::AppState;

    pub fn app(
        state: AppState,
    ) -> App<
        impl ServiceFactory<
            ServiceRequest,
            Response = ServiceResponse<impl MessageBody>,
            Config = (),
            InitError = (),
            Error = Error,
        >,
    > {
        App::new()
            .app_data(web::Data::new(state))
            .app_data(super::json_config())
            .app_data(super::query_config())
            .configure(super::configure)
    }

    pub fn bearer(token: &str) -> (&'static str, String) {
        ("Authorization", format!("Bearer {token}"))
    }

    /// Status of a call, whether a handler answered or a guard rejected it.
    pub async fn status_of<S, R, B>(app: &S, req: R) -> StatusCode
    where
        S: Service<R, Response = ServiceResponse<B>, Error = Error>,
    {
        match test::try_call_service(app, req).await {
            Ok(resp) => resp.status(),
            Err(err) => err.as_response_error().status_code(),
        }
    }
}
