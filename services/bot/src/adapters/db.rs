//! services/bot/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use review_bot_core::{
    Admin, AdminRole, Branch, BranchStats, DatabaseService, Locale, NewBranch, PhotoRef,
    PortError, PortResult, Rating, Submission, SubmissionDetails, User,
};
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::warn;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the embedded schema migrations.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    async fn photos_of(&self, review_id: i64) -> PortResult<Vec<PhotoRef>> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        let mut photos = photos_for(&mut conn, &[review_id]).await?;
        Ok(photos.remove(&review_id).unwrap_or_default())
    }

    /// Opens a transaction whose reads all see the same committed state.
    async fn snapshot(&self) -> PortResult<sqlx::Transaction<'static, sqlx::Postgres>> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        Ok(tx)
    }
}

/// Photos of the given reviews, each list ordered by position.
async fn photos_for(
    conn: &mut PgConnection,
    review_ids: &[i64],
) -> PortResult<HashMap<i64, Vec<PhotoRef>>> {
    let rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT review_id, file_id FROM review_photos \
         WHERE review_id = ANY($1) ORDER BY review_id, position",
    )
    .bind(review_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(unexpected)?;

    let mut photos: HashMap<i64, Vec<PhotoRef>> = HashMap::new();
    for (review_id, file_id) in rows {
        photos.entry(review_id).or_default().push(PhotoRef(file_id));
    }
    Ok(photos)
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: i64,
    tg_id: i64,
    first_name: Option<String>,
    last_name: Option<String>,
    phone: Option<String>,
    locale: String,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            id: self.id,
            tg_id: self.tg_id,
            first_name: self.first_name,
            last_name: self.last_name,
            phone: self.phone,
            locale: parse_locale(&self.locale),
        }
    }
}

#[derive(FromRow)]
struct BranchRecord {
    id: i64,
    name_uz: String,
    name_ru: String,
}
impl BranchRecord {
    fn to_domain(self) -> Branch {
        Branch {
            id: self.id,
            name_uz: self.name_uz,
            name_ru: self.name_ru,
        }
    }
}

#[derive(FromRow)]
struct BranchStatsRecord {
    id: i64,
    name_uz: String,
    name_ru: String,
    reviews_count: i64,
    avg_rating: Option<f64>,
}
impl BranchStatsRecord {
    fn to_domain(self) -> BranchStats {
        BranchStats {
            branch: Branch {
                id: self.id,
                name_uz: self.name_uz,
                name_ru: self.name_ru,
            },
            reviews_count: self.reviews_count,
            avg_rating: self.avg_rating,
        }
    }
}

#[derive(FromRow)]
struct ReviewRecord {
    id: i64,
    user_id: Option<i64>,
    branch_id: i64,
    rating: Option<i16>,
    text: Option<String>,
    created_at: DateTime<Utc>,
}
impl ReviewRecord {
    fn to_domain(self, photos: Vec<PhotoRef>) -> Submission {
        Submission {
            id: self.id,
            user_id: self.user_id,
            branch_id: self.branch_id,
            // The CHECK constraint keeps stored values in range.
            rating: self.rating.and_then(|r| Rating::new(i64::from(r))),
            text: self.text,
            photos,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct AdminRecord {
    tg_id: i64,
    role: String,
    group_id: Option<i64>,
}
impl AdminRecord {
    fn to_domain(self) -> Admin {
        let role = AdminRole::parse(&self.role).unwrap_or_else(|| {
            warn!("Unknown admin role '{}' for {}", self.role, self.tg_id);
            AdminRole::Admin
        });
        Admin {
            tg_id: self.tg_id,
            role,
            group_id: self.group_id,
        }
    }
}

/// A review joined with its author and branch. Relation columns are NULL when
/// the row is gone.
#[derive(FromRow)]
struct ReviewDetailsRecord {
    id: i64,
    user_id: Option<i64>,
    branch_id: i64,
    rating: Option<i16>,
    text: Option<String>,
    created_at: DateTime<Utc>,
    user_tg_id: Option<i64>,
    user_first_name: Option<String>,
    user_last_name: Option<String>,
    user_phone: Option<String>,
    user_locale: Option<String>,
    branch_name_uz: Option<String>,
    branch_name_ru: Option<String>,
}
impl ReviewDetailsRecord {
    fn to_domain(self, photos: Vec<PhotoRef>) -> SubmissionDetails {
        let user = match (self.user_id, self.user_tg_id) {
            (Some(id), Some(tg_id)) => Some(User {
                id,
                tg_id,
                first_name: self.user_first_name,
                last_name: self.user_last_name,
                phone: self.user_phone,
                locale: self.user_locale.as_deref().map(parse_locale).unwrap_or_default(),
            }),
            _ => None,
        };
        let branch = match (self.branch_name_uz, self.branch_name_ru) {
            (Some(name_uz), Some(name_ru)) => Some(Branch {
                id: self.branch_id,
                name_uz,
                name_ru,
            }),
            _ => None,
        };
        let review = ReviewRecord {
            id: self.id,
            user_id: self.user_id,
            branch_id: self.branch_id,
            rating: self.rating,
            text: self.text,
            created_at: self.created_at,
        };
        SubmissionDetails {
            submission: review.to_domain(photos),
            user,
            branch,
        }
    }
}

fn parse_locale(code: &str) -> Locale {
    Locale::from_code(code).unwrap_or_default()
}

const USER_COLUMNS: &str = "id, tg_id, first_name, last_name, phone, locale";
const REVIEW_COLUMNS: &str = "id, user_id, branch_id, rating, text, created_at";
const DETAILS_SELECT: &str = "SELECT r.id, r.user_id, r.branch_id, r.rating, r.text, r.created_at, \
     u.tg_id AS user_tg_id, u.first_name AS user_first_name, u.last_name AS user_last_name, \
     u.phone AS user_phone, u.locale AS user_locale, \
     b.name_uz AS branch_name_uz, b.name_ru AS branch_name_ru \
     FROM reviews r \
     LEFT JOIN users u ON u.id = r.user_id \
     LEFT JOIN branches b ON b.id = r.branch_id";

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn upsert_user(
        &self,
        tg_id: i64,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> PortResult<User> {
        let sql = format!(
            "INSERT INTO users (tg_id, first_name, last_name) VALUES ($1, $2, $3) \
             ON CONFLICT (tg_id) DO UPDATE \
             SET first_name = EXCLUDED.first_name, last_name = EXCLUDED.last_name \
             RETURNING {}",
            USER_COLUMNS
        );
        let record: UserRecord = sqlx::query_as(&sql)
            .bind(tg_id)
            .bind(first_name)
            .bind(last_name)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn find_user(&self, tg_id: i64) -> PortResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE tg_id = $1", USER_COLUMNS);
        let record: Option<UserRecord> = sqlx::query_as(&sql)
            .bind(tg_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(record.map(UserRecord::to_domain))
    }

    async fn get_user_locale(&self, tg_id: i64) -> PortResult<Locale> {
        let code: Option<(String,)> = sqlx::query_as("SELECT locale FROM users WHERE tg_id = $1")
            .bind(tg_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        code.map(|(code,)| parse_locale(&code))
            .ok_or_else(|| PortError::NotFound(format!("User with tg_id {} not found", tg_id)))
    }

    async fn set_user_locale(&self, tg_id: i64, locale: Locale) -> PortResult<()> {
        let result = sqlx::query("UPDATE users SET locale = $1 WHERE tg_id = $2")
            .bind(locale.code())
            .bind(tg_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "User with tg_id {} not found",
                tg_id
            )));
        }
        Ok(())
    }

    async fn set_user_phone(&self, tg_id: i64, phone: &str) -> PortResult<()> {
        let result = sqlx::query("UPDATE users SET phone = $1 WHERE tg_id = $2")
            .bind(phone)
            .bind(tg_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "User with tg_id {} not found",
                tg_id
            )));
        }
        Ok(())
    }

    async fn count_users(&self) -> PortResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(count)
    }

    async fn list_users(&self, limit: i64, offset: i64) -> PortResult<Vec<User>> {
        let sql = format!(
            "SELECT {} FROM users ORDER BY id LIMIT $1 OFFSET $2",
            USER_COLUMNS
        );
        let records: Vec<UserRecord> = sqlx::query_as(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(UserRecord::to_domain).collect())
    }

    async fn list_branches(&self) -> PortResult<Vec<Branch>> {
        let records: Vec<BranchRecord> =
            sqlx::query_as("SELECT id, name_uz, name_ru FROM branches ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(unexpected)?;
        Ok(records.into_iter().map(BranchRecord::to_domain).collect())
    }

    async fn get_branch(&self, branch_id: i64) -> PortResult<Branch> {
        let record: Option<BranchRecord> =
            sqlx::query_as("SELECT id, name_uz, name_ru FROM branches WHERE id = $1")
                .bind(branch_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(unexpected)?;
        record
            .map(BranchRecord::to_domain)
            .ok_or_else(|| PortError::NotFound(format!("Branch {} not found", branch_id)))
    }

    async fn create_branch(&self, branch: NewBranch) -> PortResult<Branch> {
        let record: BranchRecord = sqlx::query_as(
            "INSERT INTO branches (name_uz, name_ru) VALUES ($1, $2) RETURNING id, name_uz, name_ru",
        )
        .bind(&branch.name_uz)
        .bind(&branch.name_ru)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn update_branch(&self, branch_id: i64, branch: NewBranch) -> PortResult<Branch> {
        let record: Option<BranchRecord> = sqlx::query_as(
            "UPDATE branches SET name_uz = $1, name_ru = $2 WHERE id = $3 \
             RETURNING id, name_uz, name_ru",
        )
        .bind(&branch.name_uz)
        .bind(&branch.name_ru)
        .bind(branch_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        record
            .map(BranchRecord::to_domain)
            .ok_or_else(|| PortError::NotFound(format!("Branch {} not found", branch_id)))
    }

    async fn delete_branch(&self, branch_id: i64) -> PortResult<bool> {
        let result = sqlx::query("DELETE FROM branches WHERE id = $1")
            .bind(branch_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(result.rows_affected() > 0)
    }

    async fn branch_stats(&self) -> PortResult<Vec<BranchStats>> {
        let records: Vec<BranchStatsRecord> = sqlx::query_as(
            "SELECT b.id, b.name_uz, b.name_ru, \
                    COUNT(r.id) AS reviews_count, \
                    AVG(r.rating)::FLOAT8 AS avg_rating \
             FROM branches b \
             LEFT JOIN reviews r ON r.branch_id = b.id \
             GROUP BY b.id \
             ORDER BY b.id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(BranchStatsRecord::to_domain).collect())
    }

    async fn create_submission(
        &self,
        user_id: i64,
        branch_id: i64,
        rating: Option<Rating>,
        text: Option<&str>,
        photos: &[PhotoRef],
    ) -> PortResult<Submission> {
        // Dropping the transaction without commit rolls everything back.
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let sql = format!(
            "INSERT INTO reviews (user_id, branch_id, rating, text) VALUES ($1, $2, $3, $4) \
             RETURNING {}",
            REVIEW_COLUMNS
        );
        let record: ReviewRecord = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(branch_id)
            .bind(rating.map(|r| i16::from(r.value())))
            .bind(text)
            .fetch_one(&mut *tx)
            .await
            .map_err(unexpected)?;

        for (position, photo) in photos.iter().enumerate() {
            sqlx::query(
                "INSERT INTO review_photos (review_id, position, file_id) VALUES ($1, $2, $3)",
            )
            .bind(record.id)
            .bind(position as i32)
            .bind(photo.file_id())
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }

        tx.commit().await.map_err(unexpected)?;
        Ok(record.to_domain(photos.to_vec()))
    }

    async fn fetch_submission_with_relations(
        &self,
        submission_id: i64,
    ) -> PortResult<SubmissionDetails> {
        let mut tx = self.snapshot().await?;

        let sql = format!("{} WHERE r.id = $1", DETAILS_SELECT);
        let record: ReviewDetailsRecord = sqlx::query_as(&sql)
            .bind(submission_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| PortError::NotFound(format!("Review {} not found", submission_id)))?;
        let mut photos = photos_for(&mut tx, &[record.id]).await?;

        tx.commit().await.map_err(unexpected)?;
        let photos = photos.remove(&record.id).unwrap_or_default();
        Ok(record.to_domain(photos))
    }

    async fn count_submissions(&self) -> PortResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reviews")
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(count)
    }

    async fn list_submissions(
        &self,
        limit: i64,
        offset: i64,
    ) -> PortResult<Vec<SubmissionDetails>> {
        let mut tx = self.snapshot().await?;

        let sql = format!("{} ORDER BY r.id DESC LIMIT $1 OFFSET $2", DETAILS_SELECT);
        let records: Vec<ReviewDetailsRecord> = sqlx::query_as(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut *tx)
            .await
            .map_err(unexpected)?;
        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        let mut photos = photos_for(&mut tx, &ids).await?;

        tx.commit().await.map_err(unexpected)?;
        Ok(records
            .into_iter()
            .map(|r| {
                let own = photos.remove(&r.id).unwrap_or_default();
                r.to_domain(own)
            })
            .collect())
    }

    async fn update_submission(
        &self,
        submission_id: i64,
        rating: Option<Rating>,
        text: Option<&str>,
    ) -> PortResult<Submission> {
        let sql = format!(
            "UPDATE reviews SET rating = COALESCE($1, rating), text = COALESCE($2, text) \
             WHERE id = $3 RETURNING {}",
            REVIEW_COLUMNS
        );
        let record: ReviewRecord = sqlx::query_as(&sql)
            .bind(rating.map(|r| i16::from(r.value())))
            .bind(text)
            .bind(submission_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| PortError::NotFound(format!("Review {} not found", submission_id)))?;
        let photos = self.photos_of(record.id).await?;
        Ok(record.to_domain(photos))
    }

    async fn delete_submission(&self, submission_id: i64) -> PortResult<bool> {
        let result = sqlx::query("DELETE FROM reviews WHERE id = $1")
            .bind(submission_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_admin(&self, tg_id: i64) -> PortResult<Option<Admin>> {
        let record: Option<AdminRecord> =
            sqlx::query_as("SELECT tg_id, role, group_id FROM admins WHERE tg_id = $1")
                .bind(tg_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(unexpected)?;
        Ok(record.map(AdminRecord::to_domain))
    }

    async fn list_admins(&self) -> PortResult<Vec<Admin>> {
        let records: Vec<AdminRecord> =
            sqlx::query_as("SELECT tg_id, role, group_id FROM admins ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(unexpected)?;
        Ok(records.into_iter().map(AdminRecord::to_domain).collect())
    }

    async fn add_admin(&self, tg_id: i64, role: AdminRole) -> PortResult<Admin> {
        let record: AdminRecord = sqlx::query_as(
            "INSERT INTO admins (tg_id, role) VALUES ($1, $2) \
             ON CONFLICT (tg_id) DO UPDATE SET role = EXCLUDED.role \
             RETURNING tg_id, role, group_id",
        )
        .bind(tg_id)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn remove_admin(&self, tg_id: i64) -> PortResult<bool> {
        let result = sqlx::query("DELETE FROM admins WHERE tg_id = $1")
            .bind(tg_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(result.rows_affected() > 0)
    }

    async fn resolve_notification_channel(&self, owner_tg_id: i64) -> PortResult<Option<i64>> {
        let row: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT group_id FROM admins WHERE tg_id = $1")
                .bind(owner_tg_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(unexpected)?;
        Ok(row.and_then(|(group_id,)| group_id))
    }

    async fn set_notification_channel(
        &self,
        owner_tg_id: i64,
        chat_id: i64,
        role: AdminRole,
    ) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO admins (tg_id, role, group_id) VALUES ($1, $2, $3) \
             ON CONFLICT (tg_id) DO UPDATE SET group_id = EXCLUDED.group_id",
        )
        .bind(owner_tg_id)
        .bind(role.as_str())
        .bind(chat_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn joined_row() -> ReviewDetailsRecord {
        ReviewDetailsRecord {
            id: 7,
            user_id: Some(3),
            branch_id: 2,
            rating: Some(4),
            text: Some("ok".into()),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            user_tg_id: Some(501),
            user_first_name: Some("Ali".into()),
            user_last_name: None,
            user_phone: Some("+998".into()),
            user_locale: Some("ru".into()),
            branch_name_uz: Some("Chilonzor".into()),
            branch_name_ru: Some("Чиланзар".into()),
        }
    }

    #[test]
    fn joined_row_carries_relations_and_ordered_photos() {
        let photos = vec![PhotoRef::new("p1"), PhotoRef::new("p2")];
        let details = joined_row().to_domain(photos.clone());

        assert_eq!(details.submission.id, 7);
        assert_eq!(details.submission.rating, Rating::new(4));
        assert_eq!(details.submission.photos, photos);
        let user = details.user.unwrap();
        assert_eq!((user.id, user.tg_id, user.locale), (3, 501, Locale::Ru));
        assert_eq!(details.branch.unwrap().name_ru, "Чиланзар");
    }

    #[test]
    fn joined_row_without_relations_maps_to_none() {
        let mut row = joined_row();
        // The author was deleted (user_id SET NULL) and the LEFT JOIN found nothing.
        row.user_id = None;
        row.user_tg_id = None;
        row.branch_name_uz = None;
        row.branch_name_ru = None;

        let details = row.to_domain(Vec::new());
        assert!(details.user.is_none());
        assert!(details.branch.is_none());
        assert_eq!(details.submission.text.as_deref(), Some("ok"));
    }
}
