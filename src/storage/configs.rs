use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::debug;
use url::Url;

use crate::error::{HarvestError, HarvestResult};

/// Placeholder substituted with the page index in `url_pattern`
pub const PAGE_PLACEHOLDER: &str = "{page}";

/// Upper bound on the number of pages one website run may walk
pub const MAX_PAGES: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Website,
    Xml,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Website => write!(f, "website"),
            SourceKind::Xml => write!(f, "xml"),
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "website" => Ok(SourceKind::Website),
            "xml" => Ok(SourceKind::Xml),
            other => Err(format!("unknown source kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConfigStatus {
    #[default]
    Active,
    Inactive,
}

/// A named definition of a scraping source and its upload/output rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScraperConfig {
    pub id: i64,
    pub name: String,
    pub source_kind: SourceKind,
    pub website_url: Option<String>,
    pub url_pattern: Option<String>,
    pub page_start: Option<i64>,
    pub page_end: Option<i64>,
    pub page_count: Option<i64>,
    pub xml_link: Option<String>,
    /// Maximum number of properties a run may emit
    pub max_properties: Option<i64>,
    pub enable_upload: bool,
    pub testing_mode: bool,
    pub output_folder: Option<String>,
    pub output_filename: Option<String>,
    pub adapter_path: Option<String>,
    pub owned_by: Option<String>,
    pub contact_person: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub listing_id_prefix: Option<String>,
    pub status: ConfigStatus,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScraperConfig {
    /// Expand `url_pattern` over the configured page range.
    ///
    /// `page_end` wins over `page_count`; a pattern without a range yields one page.
    /// A range that fails `page_range` yields nothing.
    pub fn page_urls(&self) -> Vec<String> {
        let Some(pattern) = self.url_pattern.as_deref() else {
            return self.website_url.iter().cloned().collect();
        };

        match page_range(self.page_start, self.page_end, self.page_count) {
            Ok((start, end)) => (start..=end)
                .map(|page| pattern.replace(PAGE_PLACEHOLDER, &page.to_string()))
                .collect(),
            Err(e) => {
                debug!("Config {} has no usable page range: {}", self.id, e);
                Vec::new()
            }
        }
    }

    /// Editable fields of this config, as accepted by `create`
    pub fn to_new(&self) -> NewScraperConfig {
        NewScraperConfig {
            name: self.name.clone(),
            source_kind: self.source_kind,
            website_url: self.website_url.clone(),
            url_pattern: self.url_pattern.clone(),
            page_start: self.page_start,
            page_end: self.page_end,
            page_count: self.page_count,
            xml_link: self.xml_link.clone(),
            max_properties: self.max_properties,
            enable_upload: self.enable_upload,
            testing_mode: self.testing_mode,
            output_folder: self.output_folder.clone(),
            output_filename: self.output_filename.clone(),
            adapter_path: self.adapter_path.clone(),
            owned_by: self.owned_by.clone(),
            contact_person: self.contact_person.clone(),
            phone: self.phone.clone(),
            email: self.email.clone(),
            listing_id_prefix: self.listing_id_prefix.clone(),
            status: self.status,
            created_by: self.created_by.clone(),
        }
    }
}

/// Input for creating a config, e.g. from a YAML document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewScraperConfig {
    pub name: String,
    pub source_kind: SourceKind,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub url_pattern: Option<String>,
    #[serde(default)]
    pub page_start: Option<i64>,
    #[serde(default)]
    pub page_end: Option<i64>,
    #[serde(default)]
    pub page_count: Option<i64>,
    #[serde(default)]
    pub xml_link: Option<String>,
    #[serde(default)]
    pub max_properties: Option<i64>,
    #[serde(default)]
    pub enable_upload: bool,
    #[serde(default)]
    pub testing_mode: bool,
    #[serde(default)]
    pub output_folder: Option<String>,
    #[serde(default)]
    pub output_filename: Option<String>,
    #[serde(default)]
    pub adapter_path: Option<String>,
    #[serde(default)]
    pub owned_by: Option<String>,
    #[serde(default)]
    pub contact_person: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub listing_id_prefix: Option<String>,
    #[serde(default)]
    pub status: ConfigStatus,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl NewScraperConfig {
    /// Check the per-kind source invariant
    pub fn validate(&self) -> HarvestResult<()> {
        fn present(value: &Option<String>) -> bool {
            value.as_deref().map_or(false, |v| !v.trim().is_empty())
        }

        if self.name.trim().is_empty() {
            return Err(HarvestError::Configuration("config name is required".to_string()));
        }

        match self.source_kind {
            SourceKind::Website => {
                if !present(&self.website_url) || !present(&self.url_pattern) {
                    return Err(HarvestError::Configuration(
                        "website configs require website_url and url_pattern".to_string(),
                    ));
                }
                let pattern = self.url_pattern.as_deref().unwrap_or_default();
                if !pattern.contains(PAGE_PLACEHOLDER) {
                    return Err(HarvestError::Configuration(format!(
                        "url_pattern must contain the {} placeholder",
                        PAGE_PLACEHOLDER
                    )));
                }
                check_url("website_url", self.website_url.as_deref().unwrap_or_default())?;
                check_url("url_pattern", &pattern.replace(PAGE_PLACEHOLDER, "1"))?;
                page_range(self.page_start, self.page_end, self.page_count)?;
            }
            SourceKind::Xml => {
                if !present(&self.xml_link) {
                    return Err(HarvestError::Configuration(
                        "xml configs require xml_link".to_string(),
                    ));
                }
                check_url("xml_link", self.xml_link.as_deref().unwrap_or_default())?;
            }
        }

        Ok(())
    }
}

/// Inclusive page range, bounded by `MAX_PAGES`
fn page_range(start: Option<i64>, end: Option<i64>, count: Option<i64>) -> HarvestResult<(i64, i64)> {
    let start = start.unwrap_or(1);
    if start < 0 {
        return Err(HarvestError::Configuration(format!("page_start must not be negative, got {}", start)));
    }

    let end = match (end, count) {
        (Some(end), _) => end,
        (None, Some(count)) if count < 1 => {
            return Err(HarvestError::Configuration(format!("page_count must be at least 1, got {}", count)));
        }
        (None, Some(count)) => start.checked_add(count - 1).ok_or_else(|| {
            HarvestError::Configuration(format!("page range starting at {} overflows", start))
        })?,
        (None, None) => start,
    };

    if end < start {
        return Err(HarvestError::Configuration(format!(
            "page_end ({}) is before page_start ({})",
            end, start
        )));
    }
    if end - start >= MAX_PAGES {
        return Err(HarvestError::Configuration(format!(
            "page range {}..={} exceeds {} pages",
            start, end, MAX_PAGES
        )));
    }

    Ok((start, end))
}

fn check_url(field: &str, value: &str) -> HarvestResult<()> {
    let parsed = Url::parse(value.trim())
        .map_err(|e| HarvestError::Configuration(format!("{} is not a valid URL: {}", field, e)))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(HarvestError::Configuration(format!(
            "{} must be an http(s) URL, got {}",
            field, other
        ))),
    }
}

/// Filter for listing configs
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFilter {
    pub kind: Option<SourceKind>,
    pub search: Option<String>,
}

/// Row shape returned by `list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConfigSummary {
    pub id: i64,
    pub name: String,
    pub source_kind: SourceKind,
    pub status: ConfigStatus,
    pub owned_by: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Repository for scraper configs
#[derive(Clone)]
pub struct ConfigRepository {
    pool: Pool<Sqlite>,
}

impl ConfigRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn list(&self, filter: &ConfigFilter) -> HarvestResult<Vec<ConfigSummary>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT id, name, source_kind, status, owned_by, last_run_at FROM scraper_configs WHERE 1 = 1",
        );

        if let Some(kind) = filter.kind {
            query.push(" AND source_kind = ").push_bind(kind);
        }

        if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let like = format!("%{}%", search.trim());
            query
                .push(" AND (name LIKE ")
                .push_bind(like.clone())
                .push(" OR website_url LIKE ")
                .push_bind(like.clone())
                .push(" OR xml_link LIKE ")
                .push_bind(like)
                .push(")");
        }

        query.push(" ORDER BY name COLLATE NOCASE, id");

        let rows = query
            .build_query_as::<ConfigSummary>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    pub async fn get(&self, id: i64) -> HarvestResult<ScraperConfig> {
        sqlx::query_as::<_, ScraperConfig>("SELECT * FROM scraper_configs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| HarvestError::not_found("config", id))
    }

    pub async fn create(&self, new: &NewScraperConfig) -> HarvestResult<ScraperConfig> {
        new.validate()?;
        let now = Utc::now();

        let id = sqlx::query(
            "INSERT INTO scraper_configs (
                name, source_kind, website_url, url_pattern, page_start, page_end, page_count,
                xml_link, max_properties, enable_upload, testing_mode, output_folder,
                output_filename, adapter_path, owned_by, contact_person, phone, email,
                listing_id_prefix, status, last_run_at, created_by, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?)",
        )
        .bind(&new.name)
        .bind(new.source_kind)
        .bind(&new.website_url)
        .bind(&new.url_pattern)
        .bind(new.page_start)
        .bind(new.page_end)
        .bind(new.page_count)
        .bind(&new.xml_link)
        .bind(new.max_properties)
        .bind(new.enable_upload)
        .bind(new.testing_mode)
        .bind(&new.output_folder)
        .bind(&new.output_filename)
        .bind(&new.adapter_path)
        .bind(&new.owned_by)
        .bind(&new.contact_person)
        .bind(&new.phone)
        .bind(&new.email)
        .bind(&new.listing_id_prefix)
        .bind(new.status)
        .bind(&new.created_by)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        debug!("Created scraper config {} ({})", id, new.name);
        self.get(id).await
    }

    /// Delete a config; running jobs keep their snapshot
    pub async fn delete(&self, id: i64) -> HarvestResult<()> {
        let result = sqlx::query("DELETE FROM scraper_configs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(HarvestError::not_found("config", id));
        }

        debug!("Deleted scraper config {}", id);
        Ok(())
    }

    /// Copy a config under a fresh id; the copy starts inactive and has never run
    pub async fn duplicate(&self, id: i64) -> HarvestResult<ScraperConfig> {
        let original = self.get(id).await?;
        let mut copy = original.to_new();
        copy.status = ConfigStatus::Inactive;
        self.create(&copy).await
    }

    pub async fn touch_last_run(&self, id: i64, at: DateTime<Utc>) -> HarvestResult<()> {
        sqlx::query("UPDATE scraper_configs SET last_run_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::Database;

    pub fn website_config(name: &str) -> NewScraperConfig {
        NewScraperConfig {
            name: name.to_string(),
            source_kind: SourceKind::Website,
            website_url: Some("https://homes.example".to_string()),
            url_pattern: Some("https://homes.example/list?page={page}".to_string()),
            page_start: Some(1),
            page_end: Some(3),
            page_count: None,
            xml_link: None,
            max_properties: Some(50),
            enable_upload: true,
            testing_mode: false,
            output_folder: None,
            output_filename: None,
            adapter_path: None,
            owned_by: Some("agency-7".to_string()),
            contact_person: Some("Sam Doe".to_string()),
            phone: None,
            email: Some("sam@homes.example".to_string()),
            listing_id_prefix: Some("HX-".to_string()),
            status: ConfigStatus::Active,
            created_by: Some("operator".to_string()),
        }
    }

    pub fn xml_config(name: &str) -> NewScraperConfig {
        NewScraperConfig {
            source_kind: SourceKind::Xml,
            website_url: None,
            url_pattern: None,
            page_start: None,
            page_end: None,
            xml_link: Some("https://feeds.example/listings.xml".to_string()),
            ..website_config(name)
        }
    }

    #[test]
    fn test_validate_kind_invariant() {
        assert!(website_config("a").validate().is_ok());
        assert!(xml_config("b").validate().is_ok());

        let mut missing_pattern = website_config("c");
        missing_pattern.url_pattern = None;
        assert!(matches!(missing_pattern.validate(), Err(HarvestError::Configuration(_))));

        let mut no_placeholder = website_config("d");
        no_placeholder.url_pattern = Some("https://homes.example/list".to_string());
        assert!(no_placeholder.validate().is_err());

        let mut missing_link = xml_config("e");
        missing_link.xml_link = Some("  ".to_string());
        assert!(missing_link.validate().is_err());

        let mut relative = xml_config("f");
        relative.xml_link = Some("/feeds/listings.xml".to_string());
        assert!(relative.validate().is_err());

        let mut ftp = website_config("g");
        ftp.website_url = Some("ftp://homes.example".to_string());
        assert!(ftp.validate().is_err());
    }

    #[tokio::test]
    async fn test_page_urls() {
        let db = Database::in_memory().await;
        let repo = db.configs();

        let config = repo.create(&website_config("ranged")).await.unwrap();
        assert_eq!(
            config.page_urls(),
            vec![
                "https://homes.example/list?page=1",
                "https://homes.example/list?page=2",
                "https://homes.example/list?page=3",
            ]
        );

        let mut counted = website_config("counted");
        counted.page_start = Some(4);
        counted.page_end = None;
        counted.page_count = Some(2);
        let config = repo.create(&counted).await.unwrap();
        assert_eq!(
            config.page_urls(),
            vec!["https://homes.example/list?page=4", "https://homes.example/list?page=5"]
        );
    }

    #[test]
    fn test_validate_page_range() {
        let mut reversed = website_config("reversed");
        reversed.page_start = Some(5);
        reversed.page_end = Some(2);
        assert!(matches!(reversed.validate(), Err(HarvestError::Configuration(_))));

        let mut zero_count = website_config("zero");
        zero_count.page_end = None;
        zero_count.page_count = Some(0);
        assert!(zero_count.validate().is_err());

        let mut overflow = website_config("overflow");
        overflow.page_start = Some(i64::MAX);
        overflow.page_end = None;
        overflow.page_count = Some(2);
        assert!(overflow.validate().is_err());

        let mut huge = website_config("huge");
        huge.page_end = Some(i64::MAX);
        assert!(huge.validate().is_err());

        let mut negative = website_config("negative");
        negative.page_start = Some(-1);
        assert!(negative.validate().is_err());

        let mut widest = website_config("widest");
        widest.page_start = Some(1);
        widest.page_end = Some(MAX_PAGES);
        assert!(widest.validate().is_ok());
        widest.page_end = Some(MAX_PAGES + 1);
        assert!(widest.validate().is_err());

        // Ranges are not checked for XML configs
        let mut feed = xml_config("feed");
        feed.page_start = Some(5);
        feed.page_end = Some(2);
        assert!(feed.validate().is_ok());
    }

    #[tokio::test]
    async fn test_page_urls_unusable_range_is_empty() {
        let db = Database::in_memory().await;
        let mut config = db.configs().create(&website_config("stored")).await.unwrap();

        config.page_start = Some(i64::MAX);
        config.page_end = None;
        config.page_count = Some(2);
        assert!(config.page_urls().is_empty());

        config.page_end = Some(1);
        assert!(config.page_urls().is_empty());
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let db = Database::in_memory().await;
        let repo = db.configs();

        let created = repo.create(&website_config("Coastal Homes")).await.unwrap();
        let fetched = repo.get(created.id).await.unwrap();
        assert_eq!(created, fetched);
        assert_eq!(fetched.status, ConfigStatus::Active);

        repo.delete(created.id).await.unwrap();
        assert!(repo.get(created.id).await.unwrap_err().is_not_found());
        assert!(repo.delete(created.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_duplicate_resets_identity_and_run_state() {
        let db = Database::in_memory().await;
        let repo = db.configs();

        let original = repo.create(&website_config("Harbour")).await.unwrap();
        repo.touch_last_run(original.id, Utc::now()).await.unwrap();
        let original = repo.get(original.id).await.unwrap();

        let copy = repo.duplicate(original.id).await.unwrap();
        assert_ne!(copy.id, original.id);
        assert_eq!(copy.status, ConfigStatus::Inactive);
        assert!(copy.last_run_at.is_none());

        let mut expected = original.to_new();
        expected.status = ConfigStatus::Inactive;
        assert_eq!(copy.to_new(), expected);

        assert!(repo.duplicate(9999).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_filters() {
        let db = Database::in_memory().await;
        let repo = db.configs();

        repo.create(&website_config("beta site")).await.unwrap();
        repo.create(&xml_config("Alpha feed")).await.unwrap();
        repo.create(&website_config("gamma site")).await.unwrap();

        let all = repo.list(&ConfigFilter::default()).await.unwrap();
        let names: Vec<_> = all.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha feed", "beta site", "gamma site"]);

        let xml = repo
            .list(&ConfigFilter { kind: Some(SourceKind::Xml), search: None })
            .await
            .unwrap();
        assert_eq!(xml.len(), 1);
        assert_eq!(xml[0].source_kind, SourceKind::Xml);

        let searched = repo
            .list(&ConfigFilter { kind: None, search: Some("gamma".to_string()) })
            .await
            .unwrap();
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].name, "gamma site");
    }

    #[tokio::test]
    async fn test_create_rejects_invalid() {
        let db = Database::in_memory().await;
        let mut bad = xml_config("broken");
        bad.xml_link = None;
        let err = db.configs().create(&bad).await.unwrap_err();
        assert!(matches!(err, HarvestError::Configuration(_)));
    }
}
