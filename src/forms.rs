//! Field schemas for the admin create/edit/view dialogs.

use std::str::FromStr;

use serde::Serialize;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Booking,
    Coupon,
    Service,
    Customer,
    Provider,
    Contact,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Booking => "booking",
            Resource::Coupon => "coupon",
            Resource::Service => "service",
            Resource::Customer => "customer",
            Resource::Provider => "provider",
            Resource::Contact => "contact",
        }
    }
}

impl FromStr for Resource {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "booking" => Ok(Resource::Booking),
            "coupon" => Ok(Resource::Coupon),
            "service" => Ok(Resource::Service),
            "customer" => Ok(Resource::Customer),
            "provider" => Ok(Resource::Provider),
            "contact" => Ok(Resource::Contact),
            other => Err(AppError::validation(format!("Unknown resource '{other}'."))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogAction {
    Create,
    Edit,
    View,
}

impl DialogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogAction::Create => "create",
            DialogAction::Edit => "edit",
            DialogAction::View => "view",
        }
    }
}

impl FromStr for DialogAction {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "create" => Ok(DialogAction::Create),
            "edit" => Ok(DialogAction::Edit),
            "view" => Ok(DialogAction::View),
            other => Err(AppError::validation(format!("Unknown dialog action '{other}'."))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    Text,
    TextArea,
    Email,
    Phone,
    Number,
    Money,
    Percent,
    Date,
    Time,
    DateTime,
    Toggle,
    Select(&'static [&'static str]),
    Image,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogSpec {
    pub resource: Resource,
    pub action: DialogAction,
    pub title: String,
    pub fields: Vec<FieldSpec>,
}

const fn field(name: &'static str, label: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        label,
        kind,
        required: false,
        read_only: false,
    }
}

const fn required(name: &'static str, label: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        label,
        kind,
        required: true,
        read_only: false,
    }
}

const BOOKING_STATUSES: &[&str] = &["pending", "accepted", "in-progress", "completed", "cancelled"];
const PAYMENT_STATUSES: &[&str] = &["pending", "paid", "failed", "refunded"];
const DISCOUNT_TYPES: &[&str] = &["flat", "percent"];
const KYC_STATUSES: &[&str] = &["pending", "approved", "rejected"];
const CONTACT_STATUSES: &[&str] = &["NEW", "REPLIED"];

fn coupon_fields() -> Vec<FieldSpec> {
    vec![
        required("code", "Code", FieldKind::Text),
        required("discountType", "Discount type", FieldKind::Select(DISCOUNT_TYPES)),
        required("discountValue", "Discount value", FieldKind::Number),
        required("expiryDate", "Expiry date", FieldKind::Date),
        field("minBookingValue", "Minimum booking value", FieldKind::Money),
        field("usageLimit", "Usage limit", FieldKind::Number),
        field("isGlobal", "Available to everyone", FieldKind::Toggle),
        field("isFirstBooking", "First booking only", FieldKind::Toggle),
        field("assignedTo", "Assigned customer", FieldKind::Text),
        field("isActive", "Active", FieldKind::Toggle),
    ]
}

fn service_fields() -> Vec<FieldSpec> {
    vec![
        required("title", "Title", FieldKind::Text),
        required("category", "Category", FieldKind::Text),
        field("description", "Description", FieldKind::TextArea),
        required("basePrice", "Base price", FieldKind::Money),
        required("duration", "Duration (hours)", FieldKind::Number),
        field("image", "Image", FieldKind::Image),
        field("isActive", "Active", FieldKind::Toggle),
    ]
}

fn fields_for(resource: Resource, action: DialogAction) -> Option<Vec<FieldSpec>> {
    use DialogAction::*;
    use Resource::*;

    let fields = match (resource, action) {
        (Coupon, Create | Edit) => coupon_fields(),
        (Coupon, View) => {
            let mut fields = coupon_fields();
            fields.push(field("usedCount", "Times used", FieldKind::Number));
            fields.push(field("createdAt", "Created", FieldKind::DateTime));
            fields
        }
        (Service, Create | Edit) => service_fields(),
        (Service, View) => {
            let mut fields = service_fields();
            fields.push(field("averageRating", "Average rating", FieldKind::Number));
            fields.push(field("ratingCount", "Ratings", FieldKind::Number));
            fields
        }
        (Booking, Edit) => vec![
            field("date", "Date", FieldKind::Date),
            field("time", "Time", FieldKind::Time),
            field("providerId", "Provider", FieldKind::Text),
            field("status", "Status", FieldKind::Select(BOOKING_STATUSES)),
            field("paymentStatus", "Payment status", FieldKind::Select(PAYMENT_STATUSES)),
            field("transactionId", "Transaction id", FieldKind::Text),
        ],
        (Booking, View) => vec![
            field("id", "Booking id", FieldKind::Text),
            field("customer", "Customer", FieldKind::Text),
            field("provider", "Provider", FieldKind::Text),
            field("services", "Services", FieldKind::Text),
            field("address", "Address", FieldKind::TextArea),
            field("date", "Date", FieldKind::Date),
            field("time", "Time", FieldKind::Time),
            field("status", "Status", FieldKind::Select(BOOKING_STATUSES)),
            field("totalAmount", "Total", FieldKind::Money),
            field("paymentStatus", "Payment status", FieldKind::Select(PAYMENT_STATUSES)),
        ],
        (Customer, Edit) => vec![
            field("customDiscount", "Custom discount", FieldKind::Percent),
            field("isVerified", "Verified", FieldKind::Toggle),
            field("active", "Account active", FieldKind::Toggle),
        ],
        (Customer, View) => vec![
            field("name", "Name", FieldKind::Text),
            field("email", "Email", FieldKind::Email),
            field("phone", "Phone", FieldKind::Phone),
            field("city", "City", FieldKind::Text),
            field("totalBookings", "Bookings", FieldKind::Number),
            field("customDiscount", "Custom discount", FieldKind::Percent),
            field("lastActiveAt", "Last active", FieldKind::DateTime),
        ],
        (Provider, Edit) => vec![
            required("kycStatus", "KYC status", FieldKind::Select(KYC_STATUSES)),
            field("reason", "Rejection reason", FieldKind::TextArea),
        ],
        (Provider, View) => vec![
            field("name", "Name", FieldKind::Text),
            field("email", "Email", FieldKind::Email),
            field("phone", "Phone", FieldKind::Phone),
            field("city", "City", FieldKind::Text),
            field("serviceArea", "Service area", FieldKind::Text),
            field("kycStatus", "KYC status", FieldKind::Select(KYC_STATUSES)),
            field("testScore", "Test score", FieldKind::Percent),
            field("bankVerified", "Bank verified", FieldKind::Toggle),
            field("averageRating", "Average rating", FieldKind::Number),
        ],
        (Contact, View) => vec![
            field("name", "Name", FieldKind::Text),
            field("email", "Email", FieldKind::Email),
            field("phone", "Phone", FieldKind::Phone),
            field("subject", "Subject", FieldKind::Text),
            field("message", "Message", FieldKind::TextArea),
            field("status", "Status", FieldKind::Select(CONTACT_STATUSES)),
            field("adminReply", "Reply", FieldKind::TextArea),
        ],
        (Contact, Edit) => vec![required("reply", "Reply", FieldKind::TextArea)],
        (Booking | Customer | Provider | Contact, Create) => return None,
    };
    Some(fields)
}

/// Schema for one dialog. View dialogs are entirely read-only.
pub fn dialog(resource: Resource, action: DialogAction) -> Result<DialogSpec, AppError> {
    let mut fields = fields_for(resource, action).ok_or_else(|| {
        AppError::validation(format!(
            "There is no {} dialog for {} records.",
            action.as_str(),
            resource.as_str()
        ))
    })?;
    if action == DialogAction::View {
        for field in &mut fields {
            field.read_only = true;
            field.required = false;
        }
    }
    let verb = match action {
        DialogAction::Create => "New",
        DialogAction::Edit => "Edit",
        DialogAction::View => "View",
    };
    Ok(DialogSpec {
        resource,
        action,
        title: format!("{verb} {}", resource.as_str()),
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_dialogs_are_read_only() {
        let spec = dialog(Resource::Coupon, DialogAction::View).unwrap();
        assert!(spec.fields.iter().all(|field| field.read_only && !field.required));
        assert!(spec.fields.iter().any(|field| field.name == "usedCount"));
        assert_eq!(spec.title, "View coupon");
    }

    #[test]
    fn edit_dialog_keeps_required_flags() {
        let spec = dialog(Resource::Service, DialogAction::Edit).unwrap();
        let title = spec.fields.iter().find(|field| field.name == "title").unwrap();
        assert!(title.required && !title.read_only);
    }

    #[test]
    fn unsupported_pairs_are_rejected() {
        for resource in [Resource::Booking, Resource::Contact, Resource::Customer, Resource::Provider] {
            let err = dialog(resource, DialogAction::Create).unwrap_err();
            assert_eq!(err.code(), "ValidationError");
        }
        assert!(dialog(Resource::Coupon, DialogAction::Create).is_ok());
    }

    #[test]
    fn path_segments_parse() {
        assert_eq!("service".parse::<Resource>().unwrap(), Resource::Service);
        assert_eq!("edit".parse::<DialogAction>().unwrap(), DialogAction::Edit);
        assert!("invoice".parse::<Resource>().is_err());
        assert!("delete".parse::<DialogAction>().is_err());
    }

    #[test]
    fn select_options_serialize_with_the_kind() {
        let spec = dialog(Resource::Coupon, DialogAction::Create).unwrap();
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["fields"][1]["kind"]["select"][1], "percent");
        assert_eq!(json["fields"][0]["kind"], "text");
        assert_eq!(json["fields"][0]["readOnly"], false);
    }
}
