use actix_web::{http::header, HttpResponse};
use askama::Template;

use crate::{filters, models::BookingRow};

pub struct ReportLine {
    pub id: String,
    pub date: String,
    pub time: String,
    pub status: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub provider_name: String,
    pub services: String,
    pub address: String,
    pub city: String,
    pub pincode: String,
    pub subtotal: String,
    pub discount: String,
    pub coupon_code: String,
    pub total_amount: String,
    pub payment_method: String,
    pub payment_status: String,
    pub created_at: String,
}

impl From<BookingRow> for ReportLine {
    fn from(row: BookingRow) -> Self {
        Self {
            id: row.id,
            date: row.date,
            time: row.time,
            status: row.status,
            customer_name: row.customer_name,
            customer_email: row.customer_email,
            customer_phone: row.customer_phone.unwrap_or_default(),
            provider_name: row.provider_name.unwrap_or_else(|| "Unassigned".to_string()),
            services: row.services.unwrap_or_default(),
            address: row.address_line,
            city: row.city,
            pincode: row.pincode.unwrap_or_default(),
            subtotal: format!("{:.2}", row.subtotal),
            discount: format!("{:.2}", row.discount),
            coupon_code: row.coupon_code.unwrap_or_default(),
            total_amount: format!("{:.2}", row.total_amount),
            payment_method: row.payment_method,
            payment_status: row.payment_status,
            created_at: row.created_at,
        }
    }
}

#[derive(Template)]
#[template(path = "booking_report.csv", escape = "none")]
pub struct BookingReportTemplate {
    pub lines: Vec<ReportLine>,
}

impl BookingReportTemplate {
    pub fn new(rows: Vec<BookingRow>) -> Self {
        Self {
            lines: rows.into_iter().map(ReportLine::from).collect(),
        }
    }
}

/// Renders a template as a downloadable CSV file.
pub fn render_csv<T: Template>(template: T, filename: &str) -> HttpResponse {
    match template.render() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/csv; charset=utf-8")
            .insert_header((
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ))
            .body(body),
        Err(err) => {
            log::error!("Template render error: {err}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{booking::store, test_support::Fixture};

    #[actix_web::test]
    async fn report_has_header_and_one_line_per_booking() {
        let fx = Fixture::new().await;
        let id = fx.booking().await;
        let row = store::fetch_required(&fx.pool, &id).await.unwrap();

        let body = BookingReportTemplate::new(vec![row]).render().unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Booking ID,Date,Time,Status"));
        assert!(lines[1].starts_with(&id));
        assert!(lines[1].contains("\"12 MG Road, Kothrud\""));
        assert!(lines[1].contains(",Unassigned,Fan Installation,"));
        assert!(lines[1].contains(",500.00,0.00,,500.00,cash,pending,"));
    }
}
