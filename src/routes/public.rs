use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::{
    catalog::{self, ServiceFilter},
    contact::{self, ContactInput},
    db::log_activity,
    error::AppResult,
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/settings").route(web::get().to(settings)))
        .service(web::resource("/contact").route(web::post().to(submit_contact)))
        .service(web::resource("/service/services").route(web::get().to(list_services)))
        .service(web::resource("/service/services/{id}").route(web::get().to(service_detail)));
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => HttpResponse::Ok().json(json!({ "status": "ok" })),
        Err(err) => {
            log::error!("Health check failed: {err}");
            HttpResponse::ServiceUnavailable().json(json!({ "status": "unavailable" }))
        }
    }
}

async fn settings(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let snapshot = state.settings.snapshot(&state.db).await?;
    Ok(HttpResponse::Ok().json(snapshot))
}

async fn submit_contact(
    state: web::Data<AppState>,
    body: web::Json<ContactInput>,
) -> AppResult<HttpResponse> {
    let contact = contact::create(&state.db, body.into_inner()).await?;
    log_activity(
        &state.db,
        "contact_received",
        &format!("Contact message from {}: {}", contact.name, contact.subject),
        None,
        None,
    )
    .await;
    Ok(HttpResponse::Created().json(contact))
}

async fn list_services(
    state: web::Data<AppState>,
    query: web::Query<ServiceFilter>,
) -> AppResult<HttpResponse> {
    let page = catalog::list(&state.db, &query, true).await?;
    Ok(HttpResponse::Ok().json(page))
}

async fn service_detail(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let service = catalog::fetch_active(&state.db, &path).await?;
    Ok(HttpResponse::Ok().json(service))
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test};
    use serde_json::Value;

    use crate::{routes::testing::app, test_support::Fixture};

    #[actix_web::test]
    async fn settings_expose_snapshot_metadata() {
        let fx = Fixture::new().await;
        let app = test::init_service(app(fx.state.clone())).await;
        let req = test::TestRequest::get().uri("/settings").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["values"]["business_hours_start"], "08:00");
        assert!(body["fetchedAt"].is_string());
        assert!(body["expiresAt"].is_string());
    }

    #[actix_web::test]
    async fn public_catalog_hides_inactive_services() {
        let fx = Fixture::new().await;
        let visible = fx.service("Switchboard Repair", 300.0).await;
        let hidden = fx.service("Legacy Meter Swap", 900.0).await;
        sqlx::query("UPDATE services SET is_active = 0 WHERE id = ?")
            .bind(&hidden)
            .execute(&fx.pool)
            .await
            .unwrap();
        let app = test::init_service(app(fx.state.clone())).await;

        let req = test::TestRequest::get()
            .uri("/service/services?status=inactive")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["items"][0]["id"], visible.as_str());

        let req = test::TestRequest::get()
            .uri(&format!("/service/services/{hidden}"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn contact_form_and_bad_paging() {
        let fx = Fixture::new().await;
        let app = test::init_service(app(fx.state.clone())).await;
        let req = test::TestRequest::post()
            .uri("/contact")
            .set_json(serde_json::json!({
                "name": "Ravi", "email": "ravi@example.com",
                "subject": "Quote", "message": "Need an inverter installed."
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let req = test::TestRequest::get()
            .uri("/service/services?page=abc")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "ValidationError");
    }
}
