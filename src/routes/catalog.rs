use actix_web::{web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{admin_validator, AuthUser},
    catalog::{self, ServiceFilter, ServiceInput},
    db::log_activity,
    error::AppResult,
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/service/admin")
            .wrap(HttpAuthentication::bearer(admin_validator))
            .service(
                web::resource("/services")
                    .route(web::get().to(list_services))
                    .route(web::post().to(create_service)),
            )
            .service(
                web::resource("/services/{id}")
                    .route(web::put().to(update_service))
                    .route(web::delete().to(delete_service)),
            )
            .service(web::resource("/services/{id}/status").route(web::patch().to(set_status))),
    );
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusRequest {
    is_active: bool,
}

async fn list_services(
    state: web::Data<AppState>,
    query: web::Query<ServiceFilter>,
) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(catalog::list(&state.db, &query, false).await?))
}

async fn create_service(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<ServiceInput>,
) -> AppResult<HttpResponse> {
    let service = catalog::insert(&state.db, body.into_inner()).await?;
    log_activity(
        &state.db,
        "service_created",
        &format!("Service {} added", service.title),
        Some(&auth.id),
        None,
    )
    .await;
    Ok(HttpResponse::Created().json(service))
}

async fn update_service(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<ServiceInput>,
) -> AppResult<HttpResponse> {
    let service = catalog::update(&state.db, &path, body.into_inner()).await?;
    log_activity(
        &state.db,
        "service_updated",
        &format!("Service {} updated", service.title),
        Some(&auth.id),
        None,
    )
    .await;
    Ok(HttpResponse::Ok().json(service))
}

async fn set_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<StatusRequest>,
) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(catalog::set_active(&state.db, &path, body.is_active).await?))
}

async fn delete_service(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let outcome = catalog::remove(&state.db, &path).await?;
    log_activity(
        &state.db,
        "service_removed",
        &format!("Service {} {}", path.as_str(), outcome.as_str()),
        Some(&auth.id),
        None,
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({ "result": outcome })))
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test};
    use serde_json::Value;

    use crate::{
        models::Role,
        routes::testing::{app, bearer, status_of},
        test_support::Fixture,
    };

    #[actix_web::test]
    async fn admin_manages_services_and_others_are_refused() {
        let fx = Fixture::new().await;
        let admin = fx.token(&fx.admin, Role::Admin);
        let customer = fx.token(&fx.customer, Role::Customer);
        let app = test::init_service(app(fx.state.clone())).await;

        let req = test::TestRequest::post()
            .uri("/service/admin/services")
            .insert_header(bearer(&customer))
            .set_json(serde_json::json!({
                "title": "EV Charger", "category": "Installation", "basePrice": 4500.0, "duration": 3.0
            }))
            .to_request();
        assert_eq!(status_of(&app, req).await, StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri("/service/admin/services")
            .insert_header(bearer(&admin))
            .set_json(serde_json::json!({
                "title": "EV Charger", "category": "Installation", "basePrice": 4500.0, "duration": 3.0
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(resp).await;
        assert_eq!(created["category"], "installation");
        let id = created["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::patch()
            .uri(&format!("/service/admin/services/{id}/status"))
            .insert_header(bearer(&admin))
            .set_json(serde_json::json!({ "isActive": false }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["isActive"], false);

        let req = test::TestRequest::get()
            .uri("/service/admin/services?status=inactive")
            .insert_header(bearer(&admin))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["total"], 1);

        let req = test::TestRequest::delete()
            .uri(&format!("/service/admin/services/{id}"))
            .insert_header(bearer(&admin))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["result"], "deleted");
    }
}
