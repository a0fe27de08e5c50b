//! Guide articles: public reads and admin editing.

use crate::catalog::{Catalog, RelatedProduct};
use crate::error::{Error, Result};
use crate::settings::SettingsService;
use chrono::{NaiveDate, Utc};
use external_services::{fetch_as, fetch_one_as, Article, Backend, Filter, Order, Query};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

pub const ARTICLES_TABLE: &str = "guide_topics";

pub const GUIDES_UNAVAILABLE: &str = "Guides are currently unavailable";

/// Editable fields of an article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub published_date: Option<NaiveDate>,
    #[serde(default)]
    pub display_order: Option<i32>,
    #[serde(default)]
    pub is_enabled: Option<bool>,
    #[serde(default)]
    pub related_product_ids: Vec<String>,
}

impl ArticleDraft {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::Validation("Title is required".to_string()));
        }
        if self.content.trim().is_empty() {
            return Err(Error::Validation("Content is required".to_string()));
        }
        Ok(())
    }

    fn to_row(&self, author: &str, published_date: NaiveDate, display_order: i32) -> Value {
        json!({
            "title": self.title.trim(),
            "preview": self.preview,
            "content": self.content,
            "cover_image": self.cover_image,
            "author": author,
            "published_date": published_date,
            "display_order": display_order,
            "is_enabled": self.is_enabled.unwrap_or(true),
            "related_product_ids": self.related_product_ids,
        })
    }
}

/// Public article page: the article plus its linked products.
#[derive(Debug, Clone, Serialize)]
pub struct ArticleDetail {
    pub article: Article,
    pub related_products: Vec<RelatedProduct>,
}

#[derive(Clone)]
pub struct ArticleService {
    backend: Arc<dyn Backend>,
    catalog: Catalog,
    settings: Arc<SettingsService>,
    default_author: String,
}

impl ArticleService {
    pub fn new(
        backend: Arc<dyn Backend>,
        settings: Arc<SettingsService>,
        default_author: impl Into<String>,
    ) -> Self {
        Self {
            catalog: Catalog::new(backend.clone()),
            backend,
            settings,
            default_author: default_author.into(),
        }
    }

    /// Every article, enabled or not, by display order.
    pub async fn list_all(&self) -> Result<Vec<Article>> {
        let query = Query::table(ARTICLES_TABLE).order(Order::asc("display_order"));
        Ok(fetch_as(self.backend.as_ref(), &query).await?)
    }

    /// Enabled articles for the public guide index.
    pub async fn list_published(&self) -> Result<Vec<Article>> {
        self.ensure_enabled().await?;
        let query = Query::table(ARTICLES_TABLE)
            .filter(Filter::eq("is_enabled", true))
            .order(Order::asc("display_order"));
        Ok(fetch_as(self.backend.as_ref(), &query).await?)
    }

    async fn ensure_enabled(&self) -> Result<()> {
        if self.settings.current().await.guides_page_enabled {
            Ok(())
        } else {
            Err(Error::Unavailable(GUIDES_UNAVAILABLE.to_string()))
        }
    }

    /// A single enabled article. Disabled or missing articles are not found.
    pub async fn get_published(&self, id: &str) -> Result<Article> {
        self.ensure_enabled().await?;
        let query = Query::table(ARTICLES_TABLE)
            .filter(Filter::eq("id", id))
            .filter(Filter::eq("is_enabled", true));
        fetch_one_as(self.backend.as_ref(), &query)
            .await?
            .ok_or_else(|| Error::NotFound(format!("article {}", id)))
    }

    pub async fn get_with_related(&self, id: &str) -> Result<ArticleDetail> {
        let article = self.get_published(id).await?;
        let related_products = self
            .catalog
            .related_products(&article.related_product_ids)
            .await?;
        Ok(ArticleDetail {
            article,
            related_products,
        })
    }

    async fn next_display_order(&self) -> Result<i32> {
        let query = Query::table(ARTICLES_TABLE)
            .select("display_order")
            .order(Order::desc("display_order"))
            .limit(1);
        let top = self.backend.fetch(&query).await?;
        Ok(top
            .first()
            .and_then(|row| row.get("display_order"))
            .and_then(Value::as_i64)
            .map(|max| {
                i32::try_from(max)
                    .ok()
                    .and_then(|m| m.checked_add(1))
                    .ok_or_else(|| Error::Internal(format!("display order {} is out of range", max)))
            })
            .transpose()?
            .unwrap_or(0))
    }

    pub async fn create(&self, draft: ArticleDraft) -> Result<Article> {
        draft.validate()?;

        let author = draft
            .author
            .clone()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| self.default_author.clone());
        let published_date = draft
            .published_date
            .unwrap_or_else(|| Utc::now().date_naive());
        let display_order = match draft.display_order {
            Some(order) => order,
            None => self.next_display_order().await?,
        };

        let row = draft.to_row(&author, published_date, display_order);
        let mut stored = self.backend.insert(ARTICLES_TABLE, row).await?;
        if stored.is_empty() {
            return Err(Error::Internal("insert returned no row".to_string()));
        }
        let article: Article = serde_json::from_value(stored.remove(0))?;
        info!("Created article '{}' ({})", article.title, article.id);
        Ok(article)
    }

    pub async fn update(&self, id: &str, draft: ArticleDraft) -> Result<()> {
        draft.validate()?;
        let mut patch = json!({
            "title": draft.title.trim(),
            "preview": draft.preview,
            "content": draft.content,
            "cover_image": draft.cover_image,
            "related_product_ids": draft.related_product_ids,
            "updated_at": Utc::now(),
        });
        if let Some(fields) = patch.as_object_mut() {
            if let Some(author) = draft.author.filter(|a| !a.trim().is_empty()) {
                fields.insert("author".to_string(), json!(author));
            }
            if let Some(date) = draft.published_date {
                fields.insert("published_date".to_string(), json!(date));
            }
            if let Some(order) = draft.display_order {
                fields.insert("display_order".to_string(), json!(order));
            }
            if let Some(enabled) = draft.is_enabled {
                fields.insert("is_enabled".to_string(), json!(enabled));
            }
        }

        self.backend
            .update(ARTICLES_TABLE, &[Filter::eq("id", id)], patch)
            .await?;
        info!("Updated article {}", id);
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.backend
            .delete(ARTICLES_TABLE, &[Filter::eq("id", id)])
            .await?;
        info!("Deleted article {}", id);
        Ok(())
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        self.backend
            .update(
                ARTICLES_TABLE,
                &[Filter::eq("id", id)],
                json!({ "is_enabled": enabled, "updated_at": Utc::now() }),
            )
            .await?;
        Ok(())
    }

    /// Flip the enabled flag, returning the new value.
    pub async fn toggle(&self, id: &str) -> Result<bool> {
        let query = Query::table(ARTICLES_TABLE).filter(Filter::eq("id", id));
        let article: Article = fetch_one_as(self.backend.as_ref(), &query)
            .await?
            .ok_or_else(|| Error::NotFound(format!("article {}", id)))?;
        let enabled = !article.is_enabled;
        self.set_enabled(id, enabled).await?;
        Ok(enabled)
    }
}
