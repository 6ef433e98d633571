use std::path::Path;

use actix_files::NamedFile;
use actix_web::{http::header, web, HttpResponse, Result};
use actix_web_httpauth::middleware::HttpAuthentication;
use serde::Serialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::{
    auth::{any_validator, AuthUser},
    booking::BookingStatus,
    models::Role,
    state::{AppState, ServerEvent},
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/events")
            .wrap(HttpAuthentication::bearer(any_validator))
            .route(web::get().to(stream_events)),
    )
    .service(web::resource("/status/{id}/events").route(web::get().to(stream_status_events)))
    .service(web::resource("/sw.js").route(web::get().to(service_worker)));
}

async fn service_worker(state: web::Data<AppState>) -> Result<NamedFile> {
    Ok(NamedFile::open(Path::new(&state.config.static_dir).join("sw.js"))?)
}

/// Admins see every booking event, customers their own bookings, providers
/// their assignments and the open pending pool.
fn visible_to(event: &ServerEvent, user: &AuthUser) -> bool {
    match user.role {
        Role::Admin => true,
        Role::Customer => event.customer_id == user.id,
        Role::Provider => match event.provider_id.as_deref() {
            Some(provider) => provider == user.id,
            None => event.status == BookingStatus::Pending.as_str(),
        },
    }
}

async fn stream_events(state: web::Data<AppState>, auth: web::ReqData<AuthUser>) -> HttpResponse {
    let user = auth.into_inner();
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) if visible_to(&event, &user) => {
            Some(Ok::<web::Bytes, actix_web::Error>(sse_frame(&event)))
        }
        Ok(_) => None,
        Err(err) => {
            log::debug!("Event stream lagged: {err}");
            None
        }
    });

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}

fn sse_frame<T: Serialize>(event: &T) -> web::Bytes {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    web::Bytes::from(format!("event: update\ndata: {payload}\n\n"))
}

/// What an unauthenticated status page may learn about a booking.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PublicStatusEvent {
    booking_id: String,
    status: String,
    services: Option<String>,
    date: String,
    time: String,
    provider_name: Option<String>,
}

impl From<ServerEvent> for PublicStatusEvent {
    fn from(event: ServerEvent) -> Self {
        Self {
            booking_id: event.booking_id,
            status: event.status,
            services: event.services,
            date: event.date,
            time: event.time,
            provider_name: event.provider_name,
        }
    }
}

async fn stream_status_events(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let booking_id = path.into_inner();
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let event = result.ok()?;
        if event.booking_id != booking_id {
            return None;
        }
        let public = PublicStatusEvent::from(event);
        Some(Ok::<web::Bytes, actix_web::Error>(sse_frame(&public)))
    });

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(customer: &str, provider: Option<&str>, status: &str) -> ServerEvent {
        ServerEvent {
            kind: "booking_status".into(),
            booking_id: "b1".into(),
            status: status.into(),
            payment_status: "pending".into(),
            customer_id: customer.into(),
            customer_name: "Cara".into(),
            provider_id: provider.map(str::to_string),
            provider_name: provider.map(|_| "Pavan".to_string()),
            services: Some("Fan Installation".into()),
            city: "Pune".into(),
            date: "2030-01-01".into(),
            time: "10:00".into(),
            total_amount: 500.0,
        }
    }

    fn user(id: &str, role: Role) -> AuthUser {
        AuthUser {
            id: id.into(),
            name: "Tester".into(),
            role,
        }
    }

    #[test]
    fn events_are_filtered_by_role() {
        let open = event("c1", None, "pending");
        let assigned = event("c1", Some("p1"), "accepted");

        assert!(visible_to(&assigned, &user("a1", Role::Admin)));
        assert!(visible_to(&assigned, &user("c1", Role::Customer)));
        assert!(!visible_to(&assigned, &user("c2", Role::Customer)));
        assert!(visible_to(&assigned, &user("p1", Role::Provider)));
        assert!(!visible_to(&assigned, &user("p2", Role::Provider)));
        assert!(visible_to(&open, &user("p2", Role::Provider)));
        assert!(!visible_to(&event("c1", None, "cancelled"), &user("p2", Role::Provider)));
    }

    #[test]
    fn public_frames_leave_out_customer_details() {
        let frame = sse_frame(&PublicStatusEvent::from(event("c1", Some("p1"), "accepted")));
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.starts_with("event: update\ndata: {"));
        assert!(text.ends_with("\n\n"));
        assert!(text.contains("\"providerName\":\"Pavan\""));
        assert!(!text.contains("Cara"));
        assert!(!text.contains("c1"));
    }
}
