use std::io::Write;

use serde::Serialize;

use crate::error::Result;
use crate::export::{CsvOptions, write_all_csv, write_category_csv};
use crate::extract::Extractor;
use crate::listing::{
    DEFAULT_SPECIAL_PAGE, ListingPage, render_category_index, render_category_page,
};
use crate::reconcile::{ReconcileContext, ReconcileOutcome, ReplaceSet, reconcile};
use crate::store::{CategoryCount, TripleStore};
use crate::triple::{OwnerId, Triple};

/// A page save as reported by the document source.
#[derive(Debug, Clone, Copy)]
pub struct SaveEvent<'a> {
    pub owner_id: OwnerId,
    pub text: &'a str,
    /// Redirect pages carry no content of their own.
    pub is_alias: bool,
}

impl<'a> SaveEvent<'a> {
    /// Builds an event whose alias flag is taken from the `#REDIRECT` header
    /// of `text`.
    pub fn from_text(owner_id: OwnerId, text: &'a str) -> Self {
        Self {
            owner_id,
            text,
            is_alias: is_redirect_text(text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteEvent {
    pub owner_id: OwnerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    pub owner_id: OwnerId,
    pub extracted: usize,
    pub stored: usize,
    pub suppressed: bool,
}

pub struct KeyValueService<S> {
    store: S,
    extractor: Extractor,
    special_page: String,
}

impl<S: TripleStore> KeyValueService<S> {
    pub fn new(store: S, extractor: Extractor) -> Self {
        Self {
            store,
            extractor,
            special_page: DEFAULT_SPECIAL_PAGE.to_string(),
        }
    }

    pub fn with_special_page(mut self, special_page: impl Into<String>) -> Self {
        self.special_page = special_page.into();
        self
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    pub fn on_save(&mut self, event: &SaveEvent<'_>) -> Result<SaveReport> {
        let raw = self.extractor.extract(event.text);
        let extracted = raw.len();
        let context = ReconcileContext {
            owner_id: event.owner_id,
            suppressed: event.is_alias,
        };
        let outcome = reconcile(&context, raw);
        let stored = self.apply(&outcome)?;
        Ok(SaveReport {
            owner_id: outcome.owner_id(),
            extracted,
            stored: stored.unwrap_or(0),
            suppressed: stored.is_none(),
        })
    }

    pub fn on_delete(&mut self, event: DeleteEvent) -> Result<SaveReport> {
        let outcome = ReconcileOutcome::Replace(ReplaceSet::delete_only(event.owner_id));
        self.apply(&outcome)?;
        Ok(SaveReport {
            owner_id: event.owner_id,
            extracted: 0,
            stored: 0,
            suppressed: false,
        })
    }

    /// Hands a reconciled outcome to the store. Returns `None` when the owner
    /// was suppressed and nothing was written.
    pub fn apply(&mut self, outcome: &ReconcileOutcome) -> Result<Option<usize>> {
        match outcome {
            ReconcileOutcome::Suppressed { owner_id } => {
                tracing::debug!(owner = owner_id.0, "skipping key values of alias page");
                Ok(None)
            }
            ReconcileOutcome::Replace(set) => self.store.replace_all(set).map(Some),
        }
    }

    pub fn categories(&mut self) -> Result<Vec<CategoryCount>> {
        self.store.list_categories()
    }

    pub fn by_category(&mut self, category: &str) -> Result<Vec<Triple>> {
        self.store.list_by_category(category)
    }

    pub fn owner_triples(&mut self, owner: OwnerId) -> Result<Vec<Triple>> {
        self.store.list_by_owner(owner)
    }

    pub fn category_index_page(&mut self) -> Result<ListingPage> {
        let categories = self.store.list_categories()?;
        Ok(render_category_index(&self.special_page, &categories))
    }

    pub fn category_page(&mut self, category: &str) -> Result<ListingPage> {
        let triples = self.store.list_by_category(category)?;
        Ok(render_category_page(&self.special_page, category, &triples))
    }

    pub fn export_category_csv<W: Write>(
        &mut self,
        writer: &mut W,
        category: &str,
        options: &CsvOptions,
    ) -> Result<usize> {
        options.validate()?;
        let triples = self.store.list_by_category(category)?;
        write_category_csv(writer, &triples, options)
    }

    pub fn export_all_csv<W: Write>(&mut self, writer: &mut W, options: &CsvOptions) -> Result<usize> {
        options.validate()?;
        let triples = self.store.list_all()?;
        write_all_csv(writer, &triples, options)
    }
}

/// True when `text` starts with a `#REDIRECT` header.
pub fn is_redirect_text(text: &str) -> bool {
    text.trim_start()
        .get(..9)
        .is_some_and(|head| head.eq_ignore_ascii_case("#REDIRECT"))
}
