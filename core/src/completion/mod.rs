//! Completion caching
//!
//! Computing candidates means typing the whole editing context, which is
//! expensive and repeated on every keystroke while the user pauses. The
//! `CompletionCache` wraps a `CompletionSource` and keeps each computed list
//! for a short time, keyed by the exact document name, text and caret.
//!
//! Lists are shared as `Arc<[CompletionItem]>`; a cache hit returns the very
//! same allocation. Extended descriptions are computed lazily, once per item.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OnceCell, RwLock};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::CompletionError;
use crate::references::ReferenceSet;
use crate::session::CompiledUnit;

/// How long a computed list stays valid
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Prefix of helper members that are never offered to users
pub const HIDDEN_PREFIX: &str = "__";

/* ===================== Documents ===================== */

/// Snapshot of an editing context: the committed unit the text continues and
/// the references bound so far
#[derive(Debug, Clone)]
pub struct Document<P> {
    name: String,
    unit: Option<Arc<CompiledUnit<P>>>,
    references: ReferenceSet,
}

impl<P> Document<P> {
    pub fn new(
        name: impl Into<String>,
        unit: Option<Arc<CompiledUnit<P>>>,
        references: ReferenceSet,
    ) -> Self {
        Self {
            name: name.into(),
            unit,
            references,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The unit the edited text will be chained onto, `None` for a fresh session
    pub fn unit(&self) -> Option<&Arc<CompiledUnit<P>>> {
        self.unit.as_ref()
    }

    pub fn references(&self) -> &ReferenceSet {
        &self.references
    }
}

/* ===================== Candidates ===================== */

/// What kind of symbol a candidate names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Keyword,
    Function,
    AsyncFunction,
    Property,
    Constant,
    Variable,
    Module,
    Snippet,
    Other,
}

impl Classification {
    /// Display prefix used when rich display is enabled
    pub fn symbol(&self) -> &'static str {
        match self {
            Classification::Keyword => "🔑",
            Classification::Function => "🟣",
            Classification::AsyncFunction => "⚡",
            Classification::Property | Classification::Variable => "🟡",
            Classification::Constant => "🔵",
            Classification::Module => "⬜",
            Classification::Snippet => "💼",
            Classification::Other => "⚫",
        }
    }
}

pub type DescriptionFuture = Pin<Box<dyn Future<Output = String> + Send>>;

/// Produces the extended description of a candidate on demand
pub type DescriptionFn = Arc<dyn Fn() -> DescriptionFuture + Send + Sync>;

/// Wrap a description that is already known
pub fn ready_description(text: impl Into<String>) -> DescriptionFn {
    let text: String = text.into();
    Arc::new(move || -> DescriptionFuture {
        let text = text.clone();
        Box::pin(async move { text })
    })
}

/// One raw suggestion from a `CompletionSource`
#[derive(Clone)]
pub struct Candidate {
    pub label: String,
    pub classification: Classification,
    /// Short text shown next to the label by some editors
    pub inline_description: String,
    /// Whether accepting it rewrites more than the word under the caret
    pub is_complex_edit: bool,
    pub describe: DescriptionFn,
}

impl Candidate {
    pub fn new(label: impl Into<String>, classification: Classification, describe: DescriptionFn) -> Self {
        Self {
            label: label.into(),
            classification,
            inline_description: String::new(),
            is_complex_edit: false,
            describe,
        }
    }

    pub fn complex_edit(mut self, inline_description: impl Into<String>) -> Self {
        self.is_complex_edit = true;
        self.inline_description = inline_description.into();
        self
    }

    /// Whether the cache keeps this candidate at all
    fn is_offered(&self) -> bool {
        !self.label.starts_with(HIDDEN_PREFIX)
            && !(self.is_complex_edit && !self.inline_description.is_empty())
    }
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("label", &self.label)
            .field("classification", &self.classification)
            .field("inline_description", &self.inline_description)
            .field("is_complex_edit", &self.is_complex_edit)
            .finish_non_exhaustive()
    }
}

/// A filtered, decorated candidate as handed to the prompt
pub struct CompletionItem {
    label: String,
    display: String,
    classification: Classification,
    description: OnceCell<String>,
    describe: DescriptionFn,
}

impl CompletionItem {
    fn from_candidate(candidate: Candidate, rich_display: bool) -> Self {
        let display = if rich_display {
            format!("{} {}", candidate.classification.symbol(), candidate.label)
        } else {
            candidate.label.clone()
        };
        Self {
            label: candidate.label,
            display,
            classification: candidate.classification,
            description: OnceCell::new(),
            describe: candidate.describe,
        }
    }

    /// Text inserted when the item is accepted
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Text shown in the completion menu
    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    /// Extended description, computed on first request
    pub async fn description(&self) -> &str {
        self.description
            .get_or_init(|| (self.describe)())
            .await
            .as_str()
    }
}

impl fmt::Debug for CompletionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionItem")
            .field("label", &self.label)
            .field("display", &self.display)
            .field("classification", &self.classification)
            .finish_non_exhaustive()
    }
}

/* ===================== Source ===================== */

/// The expensive candidate computation the cache sits in front of
#[async_trait]
pub trait CompletionSource<P: Send + Sync + 'static>: Send + Sync {
    /// Candidates for `caret` (a byte offset into `text`)
    ///
    /// `Ok(None)` means there is nothing to compute for this position, for
    /// example inside a string literal.
    async fn candidates(
        &self,
        document: &Document<P>,
        text: &str,
        caret: usize,
    ) -> Result<Option<Vec<Candidate>>, CompletionError>;
}

/* ===================== Cache ===================== */

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    document: String,
    text: String,
    caret: usize,
}

struct Entry {
    items: Arc<[CompletionItem]>,
    inserted: Instant,
}

pub struct CompletionCache<S> {
    source: S,
    ttl: Duration,
    rich_display: bool,
    entries: RwLock<HashMap<CacheKey, Entry>>,
}

impl<S> CompletionCache<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            ttl: DEFAULT_TTL,
            rich_display: false,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Prefix displays with a symbol for the candidate's classification
    pub fn with_rich_display(mut self, rich_display: bool) -> Self {
        self.rich_display = rich_display;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Number of stored lists, expired ones included until they are looked up
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Completion items for `caret` in `text`, served from cache when possible
    pub async fn complete<P>(
        &self,
        document: &Document<P>,
        text: &str,
        caret: usize,
    ) -> Result<Arc<[CompletionItem]>, CompletionError>
    where
        P: Send + Sync + 'static,
        S: CompletionSource<P>,
    {
        let key = CacheKey {
            document: document.name().to_string(),
            text: text.to_string(),
            caret,
        };

        if !text.is_empty() {
            if let Some(items) = self.lookup(&key).await {
                trace!(document = %key.document, caret, "completion cache hit");
                return Ok(items);
            }
        }

        let candidates = match self.source.candidates(document, text, caret).await {
            Ok(Some(candidates)) => candidates,
            Ok(None) => return Ok(Arc::from(Vec::new())),
            Err(CompletionError::InconsistentState(reason)) => {
                debug!(document = %key.document, caret, reason = %reason, "completion source not ready");
                return Ok(Arc::from(Vec::new()));
            }
            Err(err) => return Err(err),
        };

        let items: Arc<[CompletionItem]> = candidates
            .into_iter()
            .filter(Candidate::is_offered)
            .map(|c| CompletionItem::from_candidate(c, self.rich_display))
            .collect::<Vec<_>>()
            .into();

        self.entries.write().await.insert(
            key,
            Entry {
                items: items.clone(),
                inserted: Instant::now(),
            },
        );
        Ok(items)
    }

    async fn lookup(&self, key: &CacheKey) -> Option<Arc<[CompletionItem]>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.inserted.elapsed() < self.ttl => {
                    return Some(entry.items.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: reap it so the map does not grow with stale contexts
        let mut entries = self.entries.write().await;
        if entries
            .get(key)
            .is_some_and(|entry| entry.inserted.elapsed() >= self.ttl)
        {
            entries.remove(key);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Offers a fixed list and counts how often it was asked
    struct Fixed {
        calls: AtomicUsize,
        result: fn() -> Result<Option<Vec<Candidate>>, CompletionError>,
    }

    impl Fixed {
        fn new(result: fn() -> Result<Option<Vec<Candidate>>, CompletionError>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                result,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionSource<()> for Fixed {
        async fn candidates(
            &self,
            _document: &Document<()>,
            _text: &str,
            _caret: usize,
        ) -> Result<Option<Vec<Candidate>>, CompletionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn sample() -> Result<Option<Vec<Candidate>>, CompletionError> {
        Ok(Some(vec![
            Candidate::new("floor", Classification::Function, ready_description("round down")),
            Candidate::new("__stanza_runtime", Classification::Variable, ready_description("")),
            Candidate::new("let", Classification::Keyword, ready_description("declare")),
            Candidate::new("for each", Classification::Snippet, ready_description(""))
                .complex_edit("loop over a list"),
            Candidate::new("#load", Classification::Snippet, ready_description("load a module"))
                .complex_edit(""),
        ]))
    }

    fn doc() -> Document<()> {
        Document::new("main", None, ReferenceSet::new())
    }

    fn labels(items: &[CompletionItem]) -> Vec<&str> {
        items.iter().map(|i| i.label()).collect()
    }

    #[tokio::test]
    async fn test_hidden_and_described_snippets_are_filtered() {
        let cache = CompletionCache::new(Fixed::new(sample));
        let items = cache.complete(&doc(), "fl", 2).await.unwrap();
        assert_eq!(labels(&items), vec!["floor", "let", "#load"]);
    }

    #[tokio::test]
    async fn test_hit_returns_same_allocation() {
        let cache = CompletionCache::new(Fixed::new(sample));
        let first = cache.complete(&doc(), "fl", 2).await.unwrap();
        let second = cache.complete(&doc(), "fl", 2).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.source().calls(), 1);

        // A different caret is a different context
        let third = cache.complete(&doc(), "fl", 1).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(cache.source().calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_text_always_recomputes() {
        let cache = CompletionCache::new(Fixed::new(sample));
        let first = cache.complete(&doc(), "", 0).await.unwrap();
        let second = cache.complete(&doc(), "", 0).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.source().calls(), 2);
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let cache = CompletionCache::new(Fixed::new(sample)).with_ttl(Duration::from_millis(20));
        let first = cache.complete(&doc(), "fl", 2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let second = cache.complete(&doc(), "fl", 2).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.source().calls(), 2);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_no_computation_is_empty_and_uncached() {
        let cache = CompletionCache::new(Fixed::new(|| Ok(None)));
        assert!(cache.complete(&doc(), "\"abc", 3).await.unwrap().is_empty());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_inconsistent_state_is_swallowed() {
        let cache = CompletionCache::new(Fixed::new(|| {
            Err(CompletionError::InconsistentState("workspace reloading".into()))
        }));
        assert!(cache.complete(&doc(), "x", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_errors_propagate() {
        let cache = CompletionCache::new(Fixed::new(|| {
            Err(CompletionError::CaretOutOfRange { caret: 9, len: 1 })
        }));
        let err = cache.complete(&doc(), "x", 9).await.unwrap_err();
        assert!(matches!(err, CompletionError::CaretOutOfRange { caret: 9, .. }));
    }

    #[tokio::test]
    async fn test_rich_display_prefixes_symbol() {
        let cache = CompletionCache::new(Fixed::new(sample)).with_rich_display(true);
        let items = cache.complete(&doc(), "fl", 2).await.unwrap();
        assert_eq!(items[0].display(), "🟣 floor");
        assert_eq!(items[1].display(), "🔑 let");
        assert_eq!(items[0].label(), "floor");
    }

    #[tokio::test]
    async fn test_description_computed_once() {
        static DESCRIBED: AtomicUsize = AtomicUsize::new(0);
        let describe: DescriptionFn = Arc::new(|| -> DescriptionFuture {
            DESCRIBED.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { "fn(num) -> num".to_string() })
        });
        let item = CompletionItem::from_candidate(
            Candidate::new("floor", Classification::Function, describe),
            false,
        );
        assert_eq!(item.description().await, "fn(num) -> num");
        assert_eq!(item.description().await, "fn(num) -> num");
        assert_eq!(DESCRIBED.load(Ordering::SeqCst), 1);
    }
}
