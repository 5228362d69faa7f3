use async_trait::async_trait;
use fundfinder_core::{MatchRecord, NewMatch, Opportunity, OpportunityDraft, Profile, StoreStats};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::store::{ensure_dedup_key, OpportunityStore, ProfileMatch, StoreError};

const OPPORTUNITY_COLUMNS: &str = "id, source, source_id, title, sponsor, description, amount_min, \
     amount_max, deadline, eligibility, focus_areas, url, location, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }
}

fn opportunity_from_row(row: &PgRow) -> Result<Opportunity, StoreError> {
    Ok(Opportunity {
        id: row.try_get("id")?,
        source: row.try_get("source")?,
        source_id: row.try_get("source_id")?,
        title: row.try_get("title")?,
        sponsor: row.try_get("sponsor")?,
        description: row.try_get("description")?,
        amount_min: row.try_get("amount_min")?,
        amount_max: row.try_get("amount_max")?,
        deadline: row.try_get("deadline")?,
        eligibility: row.try_get("eligibility")?,
        focus_areas: row.try_get("focus_areas")?,
        url: row.try_get("url")?,
        location: row.try_get("location")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn match_from_row(row: &PgRow) -> Result<MatchRecord, StoreError> {
    let score: i16 = row.try_get("score")?;
    let score = u8::try_from(score).map_err(|_| StoreError::Corrupt(format!("score {score} out of range")))?;
    Ok(MatchRecord {
        id: row.try_get("id")?,
        profile_id: row.try_get("profile_id")?,
        opportunity_id: row.try_get("opportunity_id")?,
        score,
        reasons: row.try_get("reasons")?,
        category: row.try_get("category")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl OpportunityStore for PgStore {
    async fn find_opportunity_by_source_id(
        &self,
        source: &str,
        source_id: &str,
    ) -> Result<Option<Opportunity>, StoreError> {
        let sql = format!(
            "SELECT {OPPORTUNITY_COLUMNS} FROM opportunities WHERE source = $1 AND source_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(source)
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(opportunity_from_row).transpose()
    }

    async fn upsert_opportunity(&self, draft: &OpportunityDraft) -> Result<Uuid, StoreError> {
        ensure_dedup_key(draft)?;
        let row = sqlx::query(
            r#"
            INSERT INTO opportunities (
                id, source, source_id, title, sponsor, description, amount_min, amount_max,
                deadline, eligibility, focus_areas, url, location, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW(), NOW())
            ON CONFLICT (source, source_id) DO UPDATE SET
                title = EXCLUDED.title,
                sponsor = EXCLUDED.sponsor,
                description = EXCLUDED.description,
                amount_min = EXCLUDED.amount_min,
                amount_max = EXCLUDED.amount_max,
                deadline = EXCLUDED.deadline,
                eligibility = EXCLUDED.eligibility,
                focus_areas = EXCLUDED.focus_areas,
                url = EXCLUDED.url,
                location = EXCLUDED.location,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&draft.source)
        .bind(&draft.source_id)
        .bind(&draft.title)
        .bind(&draft.sponsor)
        .bind(&draft.description)
        .bind(draft.amount_min)
        .bind(draft.amount_max)
        .bind(draft.deadline)
        .bind(&draft.eligibility)
        .bind(&draft.focus_areas)
        .bind(&draft.url)
        .bind(&draft.location)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn find_match(
        &self,
        profile_id: Uuid,
        opportunity_id: Uuid,
    ) -> Result<Option<MatchRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, profile_id, opportunity_id, score, reasons, category, created_at
              FROM opportunity_matches
             WHERE profile_id = $1 AND opportunity_id = $2
            "#,
        )
        .bind(profile_id)
        .bind(opportunity_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(match_from_row).transpose()
    }

    async fn insert_match(&self, new_match: &NewMatch) -> Result<Option<MatchRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO opportunity_matches (id, profile_id, opportunity_id, score, reasons, category)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (profile_id, opportunity_id) DO NOTHING
            RETURNING id, profile_id, opportunity_id, score, reasons, category, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new_match.profile_id)
        .bind(new_match.opportunity_id)
        .bind(i16::from(new_match.score))
        .bind(&new_match.reasons)
        .bind(new_match.category.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                StoreError::UnknownOpportunity(new_match.opportunity_id)
            }
            other => StoreError::Database(other),
        })?;
        row.as_ref().map(match_from_row).transpose()
    }

    async fn list_profiles(&self, ids: Option<&[Uuid]>) -> Result<Vec<Profile>, StoreError> {
        let rows = match ids {
            Some(ids) => {
                sqlx::query("SELECT id, data FROM profiles WHERE id = ANY($1) ORDER BY id")
                    .bind(ids)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT id, data FROM profiles ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let data: serde_json::Value = row.try_get("data")?;
            out.push(Profile::from_json(row.try_get("id")?, data));
        }
        Ok(out)
    }

    async fn matches_for_profile(&self, profile_id: Uuid) -> Result<Vec<ProfileMatch>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT m.id AS match_id, m.profile_id, m.opportunity_id, m.score, m.reasons,
                   m.category, m.created_at AS matched_at,
                   o.id, o.source, o.source_id, o.title, o.sponsor, o.description,
                   o.amount_min, o.amount_max, o.deadline, o.eligibility, o.focus_areas,
                   o.url, o.location, o.created_at, o.updated_at
              FROM opportunity_matches m
              JOIN opportunities o ON o.id = m.opportunity_id
             WHERE m.profile_id = $1
             ORDER BY m.score DESC, m.created_at DESC
            "#,
        )
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let score: i16 = row.try_get("score")?;
            let record = MatchRecord {
                id: row.try_get("match_id")?,
                profile_id: row.try_get("profile_id")?,
                opportunity_id: row.try_get("opportunity_id")?,
                score: u8::try_from(score)
                    .map_err(|_| StoreError::Corrupt(format!("score {score} out of range")))?,
                reasons: row.try_get("reasons")?,
                category: row.try_get("category")?,
                created_at: row.try_get("matched_at")?,
            };
            out.push(ProfileMatch {
                record,
                opportunity: opportunity_from_row(&row)?,
            });
        }
        Ok(out)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT (SELECT COUNT(*) FROM opportunities) AS opportunities,
                   (SELECT COUNT(*) FROM opportunity_matches) AS matches
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        let opportunities: i64 = row.try_get("opportunities")?;
        let matches: i64 = row.try_get("matches")?;
        Ok(StoreStats {
            opportunities: opportunities.max(0) as usize,
            matches: matches.max(0) as usize,
        })
    }
}
