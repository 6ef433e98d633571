use chrono::Utc;
use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::{
    auth::new_id,
    error::{AppError, AppResult},
    models::{ContactRow, ContactStatus},
    pagination::{like_pattern, Page, Paginated},
};

const CONTACT_COLUMNS: &str =
    "id, name, email, phone, subject, message, status, admin_reply, replied_at, created_at";

#[derive(Debug, Deserialize)]
pub struct ContactInput {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: String,
    pub message: String,
}

pub async fn create(pool: &SqlitePool, input: ContactInput) -> AppResult<ContactRow> {
    let name = input.name.trim();
    let email = input.email.trim().to_lowercase();
    let subject = input.subject.trim();
    let message = input.message.trim();
    if name.is_empty() || subject.is_empty() || message.is_empty() {
        return Err(AppError::validation("Name, subject and message are required."));
    }
    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(AppError::validation("Please enter a valid email address."));
    }
    if message.len() > 5000 {
        return Err(AppError::validation("Message is too long."));
    }

    let id = new_id();
    sqlx::query(
        r#"INSERT INTO contacts (id, name, email, phone, subject, message, status, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(name)
    .bind(&email)
    .bind(input.phone.as_deref().map(str::trim).filter(|phone| !phone.is_empty()))
    .bind(subject)
    .bind(message)
    .bind(ContactStatus::New.as_str())
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    fetch(pool, &id).await
}

pub async fn fetch(pool: &SqlitePool, id: &str) -> AppResult<ContactRow> {
    sqlx::query_as::<_, ContactRow>(&format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Contact"))
}

#[derive(Debug, Default, Deserialize)]
pub struct ContactFilter {
    pub status: Option<String>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, status: Option<ContactStatus>, filter: &ContactFilter) {
    if let Some(status) = status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(pattern) = like_pattern(filter.search.as_deref()) {
        qb.push(" AND (LOWER(name) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(email) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(subject) LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub async fn list(pool: &SqlitePool, filter: &ContactFilter) -> AppResult<Paginated<ContactRow>> {
    let page = Page::resolve(filter.page, filter.limit)?;
    let status = match filter.status.as_deref().map(str::trim) {
        None | Some("") | Some("all") | Some("ALL") => None,
        Some(value) if value.eq_ignore_ascii_case("new") => Some(ContactStatus::New),
        Some(value) if value.eq_ignore_ascii_case("replied") => Some(ContactStatus::Replied),
        Some(other) => {
            return Err(AppError::validation(format!("Unknown contact status '{other}'.")))
        }
    };

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM contacts WHERE 1 = 1");
    push_filters(&mut count, status, filter);
    let (total,) = count.build_query_as::<(i64,)>().fetch_one(pool).await?;

    let mut select = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {CONTACT_COLUMNS} FROM contacts WHERE 1 = 1"
    ));
    push_filters(&mut select, status, filter);
    select
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());
    let rows = select.build_query_as::<ContactRow>().fetch_all(pool).await?;
    Ok(Paginated::new(rows, total, page))
}

/// Replying again overwrites the earlier reply.
pub async fn reply(pool: &SqlitePool, id: &str, message: &str) -> AppResult<ContactRow> {
    let message = message.trim();
    if message.is_empty() {
        return Err(AppError::validation("Reply message is required."));
    }
    let updated = sqlx::query(
        "UPDATE contacts SET status = ?, admin_reply = ?, replied_at = ? WHERE id = ?",
    )
    .bind(ContactStatus::Replied.as_str())
    .bind(message)
    .bind(Utc::now().to_rfc3339())
    .bind(id)
    .execute(pool)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::NotFound("Contact"));
    }
    fetch(pool, id).await
}

pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<()> {
    let deleted = sqlx::query("DELETE FROM contacts WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(AppError::NotFound("Contact"));
    }
    Ok(())
}

pub async fn count_new(pool: &SqlitePool) -> AppResult<i64> {
    let (count,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM contacts WHERE status = ?")
        .bind(ContactStatus::New.as_str())
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn input(email: &str) -> ContactInput {
        ContactInput {
            name: "Ravi".into(),
            email: email.into(),
            phone: None,
            subject: "Wiring quote".into(),
            message: "Can you rewire a 2BHK?".into(),
        }
    }

    #[actix_web::test]
    async fn reply_marks_contact_replied() {
        let pool = test_support::pool().await;
        let contact = create(&pool, input("Ravi@Example.com")).await.unwrap();
        assert_eq!(contact.status, "NEW");
        assert_eq!(contact.email, "ravi@example.com");
        assert_eq!(count_new(&pool).await.unwrap(), 1);

        let replied = reply(&pool, &contact.id, "Yes, booking link sent.").await.unwrap();
        assert_eq!(replied.status, "REPLIED");
        assert!(replied.replied_at.is_some());

        let filter = ContactFilter {
            status: Some("new".into()),
            ..Default::default()
        };
        assert_eq!(list(&pool, &filter).await.unwrap().total, 0);

        delete(&pool, &contact.id).await.unwrap();
        assert!(matches!(
            delete(&pool, &contact.id).await,
            Err(AppError::NotFound("Contact"))
        ));
    }

    #[actix_web::test]
    async fn rejects_bad_email() {
        let pool = test_support::pool().await;
        assert!(create(&pool, input("not-an-email")).await.is_err());
    }
}
