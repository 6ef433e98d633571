use std::collections::BTreeMap;

use actix_web::{web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    auth::{admin_validator, AuthUser},
    booking::query::{self, StatusCounts},
    contact::{self, ContactFilter},
    customer::{self, CustomerFilter, CustomerUpdate},
    db::log_activity,
    error::AppResult,
    forms::{self, DialogAction, Resource},
    models::ActivityRow,
    provider::{self, KycDecision, ProviderFilter},
    routes::no_content,
    settings,
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin")
            .wrap(HttpAuthentication::bearer(admin_validator))
            .service(web::resource("/dashboard").route(web::get().to(dashboard)))
            .service(web::resource("/providers").route(web::get().to(list_providers)))
            .service(web::resource("/providers/{id}").route(web::get().to(provider_detail)))
            .service(web::resource("/providers/{id}/kyc").route(web::patch().to(review_kyc)))
            .service(
                web::resource("/providers/{id}/bank/verify").route(web::patch().to(verify_bank)),
            )
            .service(web::resource("/customers").route(web::get().to(list_customers)))
            .service(web::resource("/customers/{id}").route(web::patch().to(update_customer)))
            .service(web::resource("/contacts").route(web::get().to(list_contacts)))
            .service(web::resource("/contacts/{id}").route(web::delete().to(delete_contact)))
            .service(web::resource("/contacts/{id}/reply").route(web::post().to(reply_contact)))
            .service(web::resource("/settings").route(web::put().to(update_settings)))
            .service(web::resource("/forms/{resource}/{action}").route(web::get().to(dialog))),
    );
}

#[derive(Clone, Debug, Serialize)]
struct StatCard {
    label: &'static str,
    value: i64,
}

fn stat_cards(counts: &StatusCounts, customers: i64, providers: i64, pending_kyc: i64, new_contacts: i64) -> Vec<StatCard> {
    vec![
        StatCard {
            label: "Total bookings",
            value: counts.total,
        },
        StatCard {
            label: "Pending",
            value: counts.pending,
        },
        StatCard {
            label: "In progress",
            value: counts.in_progress,
        },
        StatCard {
            label: "Completed",
            value: counts.completed,
        },
        StatCard {
            label: "Customers",
            value: customers,
        },
        StatCard {
            label: "Providers",
            value: providers,
        },
        StatCard {
            label: "KYC awaiting review",
            value: pending_kyc,
        },
        StatCard {
            label: "New messages",
            value: new_contacts,
        },
    ]
}

async fn dashboard(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let counts = query::status_counts(&state.db, None).await?;
    let customers = customer::count(&state.db).await?;
    let (providers,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM providers")
        .fetch_one(&state.db)
        .await?;
    let pending_kyc = provider::pending_kyc_count(&state.db).await?;
    let new_contacts = contact::count_new(&state.db).await?;

    let activities = sqlx::query_as::<_, ActivityRow>(
        "SELECT message, created_at FROM activities ORDER BY created_at DESC LIMIT 10",
    )
    .fetch_all(&state.db)
    .await?;

    Ok(HttpResponse::Ok().json(json!({
        "cards": stat_cards(&counts, customers, providers, pending_kyc, new_contacts),
        "bookings": counts,
        "customers": customers,
        "providers": providers,
        "pendingKyc": pending_kyc,
        "newContacts": new_contacts,
        "recentActivity": activities,
    })))
}

async fn list_providers(
    state: web::Data<AppState>,
    query: web::Query<ProviderFilter>,
) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(provider::list(&state.db, &query).await?))
}

async fn provider_detail(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(provider::view(&state.db, &path).await?))
}

async fn review_kyc(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<KycDecision>,
) -> AppResult<HttpResponse> {
    let decision = body.into_inner();
    let status = decision.status;
    provider::review_kyc(&state.db, &path, decision).await?;
    let view = provider::view(&state.db, &path).await?;
    log_activity(
        &state.db,
        "kyc_reviewed",
        &format!("KYC for {} marked {}", view.name, status.as_str()),
        Some(&auth.id),
        None,
    )
    .await;
    Ok(HttpResponse::Ok().json(view))
}

async fn verify_bank(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    provider::verify_bank(&state.db, &path).await?;
    Ok(HttpResponse::Ok().json(provider::view(&state.db, &path).await?))
}

async fn list_customers(
    state: web::Data<AppState>,
    query: web::Query<CustomerFilter>,
) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(customer::list(&state.db, &query).await?))
}

async fn update_customer(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<CustomerUpdate>,
) -> AppResult<HttpResponse> {
    let view = customer::update(&state.db, &path, body.into_inner()).await?;
    log_activity(
        &state.db,
        "customer_updated",
        &format!("Customer {} updated", view.customer.name),
        Some(&auth.id),
        None,
    )
    .await;
    Ok(HttpResponse::Ok().json(view))
}

async fn list_contacts(
    state: web::Data<AppState>,
    query: web::Query<ContactFilter>,
) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(contact::list(&state.db, &query).await?))
}

#[derive(Debug, Deserialize)]
struct ReplyRequest {
    message: String,
}

async fn reply_contact(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ReplyRequest>,
) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(contact::reply(&state.db, &path, &body.message).await?))
}

async fn delete_contact(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    contact::delete(&state.db, &path).await?;
    Ok(no_content())
}

async fn update_settings(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<BTreeMap<String, String>>,
) -> AppResult<HttpResponse> {
    let values = body.into_inner();
    settings::validate_updates(&values)?;
    settings::save(&state.db, &values).await?;
    state.settings.invalidate().await;
    log::info!("Settings updated by {}: {:?}", auth.id, values.keys().collect::<Vec<_>>());

    Ok(HttpResponse::Ok().json(state.settings.snapshot(&state.db).await?))
}

async fn dialog(path: web::Path<(String, String)>) -> AppResult<HttpResponse> {
    let (resource, action) = path.into_inner();
    let resource: Resource = resource.parse()?;
    let action: DialogAction = action.parse()?;
    Ok(HttpResponse::Ok().json(forms::dialog(resource, action)?))
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test};
    use serde_json::{json, Value};

    use crate::{
        models::Role,
        routes::testing::{app, bearer, status_of},
        test_support::Fixture,
    };

    #[actix_web::test]
    async fn dashboard_counts() {
        let fx = Fixture::new().await;
        fx.booking().await;
        fx.new_provider("nina@test.local", "Mumbai").await;
        let token = fx.token(&fx.admin, Role::Admin);
        let app = test::init_service(app(fx.state.clone())).await;

        let req = test::TestRequest::get()
            .uri("/admin/dashboard")
            .insert_header(bearer(&token))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["bookings"]["total"], 1);
        assert_eq!(body["bookings"]["pending"], 1);
        assert_eq!(body["customers"], 1);
        assert_eq!(body["providers"], 2);
        assert_eq!(body["cards"][0]["label"], "Total bookings");
    }

    #[actix_web::test]
    async fn settings_write_is_visible_immediately() {
        let fx = Fixture::new().await;
        let token = fx.token(&fx.admin, Role::Admin);
        let app = test::init_service(app(fx.state.clone())).await;

        let req = test::TestRequest::get().uri("/settings").to_request();
        let before: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(before["values"]["business_hours_end"], "20:00");

        let req = test::TestRequest::put()
            .uri("/admin/settings")
            .insert_header(bearer(&token))
            .set_json(json!({ "business_hours_end": "21:30" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["values"]["business_hours_end"], "21:30");

        let req = test::TestRequest::get().uri("/settings").to_request();
        let after: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(after["values"]["business_hours_end"], "21:30");

        let req = test::TestRequest::put()
            .uri("/admin/settings")
            .insert_header(bearer(&token))
            .set_json(json!({ "business_hours_end": "late" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn kyc_review_requires_reason_to_reject() {
        let fx = Fixture::new().await;
        let newcomer = fx.new_provider("nina@test.local", "Pune").await;
        let token = fx.token(&fx.admin, Role::Admin);
        let app = test::init_service(app(fx.state.clone())).await;

        let req = test::TestRequest::patch()
            .uri(&format!("/admin/providers/{newcomer}/kyc"))
            .insert_header(bearer(&token))
            .set_json(json!({ "status": "rejected" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::patch()
            .uri(&format!("/admin/providers/{newcomer}/kyc"))
            .insert_header(bearer(&token))
            .set_json(json!({ "status": "approved" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["kyc"]["status"], "approved");
        assert_eq!(body["approved"], true);
        assert_eq!(body["eligible"], false);

        let req = test::TestRequest::get()
            .uri("/admin/providers?kycStatus=approved")
            .insert_header(bearer(&token))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["total"], 2);
    }

    #[actix_web::test]
    async fn dialog_schemas_by_path() {
        let fx = Fixture::new().await;
        let token = fx.token(&fx.admin, Role::Admin);
        let provider = fx.token(&fx.provider, Role::Provider);
        let app = test::init_service(app(fx.state.clone())).await;

        let req = test::TestRequest::get()
            .uri("/admin/forms/coupon/view")
            .insert_header(bearer(&token))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["title"], "View coupon");
        assert_eq!(body["fields"][0]["readOnly"], true);

        let req = test::TestRequest::get()
            .uri("/admin/forms/booking/create")
            .insert_header(bearer(&token))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get()
            .uri("/admin/forms/coupon/view")
            .insert_header(bearer(&provider))
            .to_request();
        assert_eq!(status_of(&app, req).await, StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn contacts_reply_and_customer_discount() {
        let fx = Fixture::new().await;
        let token = fx.token(&fx.admin, Role::Admin);
        let app = test::init_service(app(fx.state.clone())).await;

        let req = test::TestRequest::post()
            .uri("/contact")
            .set_json(json!({
                "name": "Ravi", "email": "ravi@example.com",
                "subject": "Quote", "message": "Need an inverter installed."
            }))
            .to_request();
        let created: Value = test::call_and_read_body_json(&app, req).await;
        let id = created["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::post()
            .uri(&format!("/admin/contacts/{id}/reply"))
            .insert_header(bearer(&token))
            .set_json(json!({ "message": "We will call you today." }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "REPLIED");

        let req = test::TestRequest::patch()
            .uri(&format!("/admin/customers/{}", fx.customer))
            .insert_header(bearer(&token))
            .set_json(json!({ "customDiscount": 10.0 }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["customDiscount"], 10.0);
    }
}
