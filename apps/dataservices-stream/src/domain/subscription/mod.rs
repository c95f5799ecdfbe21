//! Subscription Registry
//!
//! Domain types for tracking the subscriptions a client holds on its feed.
//! The registry is the source of truth used to rebuild the remote session
//! after a reconnect.
//!
//! # Design
//!
//! - Entries are keyed by `(symbol, stream kind, candle type)`.
//! - Re-adding an existing key replaces its parameters (e.g. book depth) but
//!   keeps the original insertion position, so replay order is stable.
//! - Snapshots are returned in first-insertion order.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use super::streaming::StreamKind;
use super::validation::ValidationError;

// =============================================================================
// Types
// =============================================================================

/// An instrument symbol (ticker, option series or index code).
pub type Symbol = String;

/// Maximum book depth accepted by the feed.
pub const MAX_BOOK_DEPTH: u8 = 10;

/// Candle update selector for candle streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandleType {
    /// In-progress candle updates.
    Partial,
    /// Closed candles only.
    Closed,
    /// Both partial and closed candles.
    All,
}

impl CandleType {
    /// Parse a candle type name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "partial" => Some(Self::Partial),
            "closed" => Some(Self::Closed),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Partial => "partial",
            Self::Closed => "closed",
            Self::All => "all",
        }
    }
}

/// Identity of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Stream kind the subscription belongs to.
    pub kind: StreamKind,
    /// Candle selector, for candle streams.
    pub candle_type: Option<CandleType>,
}

/// Parameters that a re-subscribe may overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SubscriptionParams {
    /// Maximum book level (books streams only).
    pub depth: Option<u8>,
}

/// A single active subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEntry {
    /// Subscription identity.
    pub key: SubscriptionKey,
    /// Current parameters.
    pub params: SubscriptionParams,
}

impl SubscriptionEntry {
    /// Instrument symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.key.symbol
    }
}

/// Optional stream-specific arguments of a subscribe/unsubscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscribeOptions {
    /// Maximum book level, 1 to 10 (books streams only).
    pub depth: Option<u8>,
    /// Candle selector (candle streams only).
    pub candle_type: Option<CandleType>,
}

impl SubscribeOptions {
    /// Options with a book depth.
    #[must_use]
    pub const fn with_depth(depth: u8) -> Self {
        Self {
            depth: Some(depth),
            candle_type: None,
        }
    }

    /// Options with a candle type.
    #[must_use]
    pub const fn with_candle_type(candle_type: CandleType) -> Self {
        Self {
            depth: None,
            candle_type: Some(candle_type),
        }
    }
}

// =============================================================================
// Validated Request
// =============================================================================

/// A validated subscribe/unsubscribe request.
///
/// Constructing one is the only way to reach the registry, so invalid
/// arguments never mutate state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    kind: StreamKind,
    symbols: Vec<Symbol>,
    options: SubscribeOptions,
}

impl SubscriptionRequest {
    /// Validate a request against the client's stream kind.
    ///
    /// Symbols are trimmed and de-duplicated, keeping first occurrence order.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for an empty list, blank symbols, a stream
    /// kind without subscriptions, or options not valid for the kind.
    pub fn new<I, S>(
        kind: StreamKind,
        symbols: I,
        options: SubscribeOptions,
    ) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !kind.supports_subscriptions() {
            return Err(ValidationError::UnsupportedAction {
                kind: kind.to_string(),
                action: "subscribe",
            });
        }

        if let Some(depth) = options.depth {
            if kind != StreamKind::Books {
                return Err(ValidationError::DepthNotAllowed(kind.to_string()));
            }
            if depth == 0 || depth > MAX_BOOK_DEPTH {
                return Err(ValidationError::DepthOutOfRange(depth));
            }
        }

        if options.candle_type.is_some() && !matches!(kind, StreamKind::Candles(_)) {
            return Err(ValidationError::CandleTypeNotAllowed(kind.to_string()));
        }

        let mut cleaned: Vec<Symbol> = Vec::new();
        for (position, raw) in symbols.into_iter().enumerate() {
            let symbol = raw.as_ref().trim();
            if symbol.is_empty() {
                return Err(ValidationError::BlankSymbol(position));
            }
            if !cleaned.iter().any(|s| s == symbol) {
                cleaned.push(symbol.to_string());
            }
        }

        if cleaned.is_empty() {
            return Err(ValidationError::EmptyInstrumentList);
        }

        Ok(Self {
            kind,
            symbols: cleaned,
            options,
        })
    }

    /// Stream kind.
    #[must_use]
    pub const fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Validated symbols.
    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Stream-specific options.
    #[must_use]
    pub const fn options(&self) -> SubscribeOptions {
        self.options
    }

    /// Registry entries described by this request.
    #[must_use]
    pub fn entries(&self) -> Vec<SubscriptionEntry> {
        self.keys()
            .map(|key| SubscriptionEntry {
                key,
                params: SubscriptionParams {
                    depth: self.options.depth,
                },
            })
            .collect()
    }

    /// Registry keys described by this request.
    pub fn keys(&self) -> impl Iterator<Item = SubscriptionKey> + '_ {
        self.symbols.iter().map(|symbol| SubscriptionKey {
            symbol: symbol.clone(),
            kind: self.kind,
            candle_type: self.options.candle_type,
        })
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    next_seq: u64,
    ordered: BTreeMap<u64, SubscriptionEntry>,
    index: HashMap<SubscriptionKey, u64>,
}

impl RegistryState {
    fn add(&mut self, entry: SubscriptionEntry) -> bool {
        if let Some(seq) = self.index.get(&entry.key) {
            if let Some(existing) = self.ordered.get_mut(seq) {
                existing.params = entry.params;
            }
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(entry.key.clone(), seq);
        self.ordered.insert(seq, entry);
        true
    }

    fn remove(&mut self, key: &SubscriptionKey) -> Option<SubscriptionEntry> {
        let seq = self.index.remove(key)?;
        self.ordered.remove(&seq)
    }
}

/// In-memory set of active subscriptions.
///
/// Thread-safe: every operation takes an internal lock, so a replay
/// snapshot never observes a half-applied request.
///
/// # Example
///
/// ```rust
/// use dataservices_stream::domain::streaming::StreamKind;
/// use dataservices_stream::domain::subscription::{
///     SubscribeOptions, SubscriptionRegistry, SubscriptionRequest,
/// };
///
/// let registry = SubscriptionRegistry::new();
/// let request = SubscriptionRequest::new(
///     StreamKind::Books,
///     ["PETR4", "VALE3"],
///     SubscribeOptions::with_depth(5),
/// )
/// .unwrap();
/// registry.add_all(request.entries());
///
/// // Refreshing PETR4 changes its depth but not its position
/// let refresh =
///     SubscriptionRequest::new(StreamKind::Books, ["PETR4"], SubscribeOptions::with_depth(1))
///         .unwrap();
/// registry.add_all(refresh.entries());
///
/// let snapshot = registry.snapshot();
/// assert_eq!(snapshot[0].symbol(), "PETR4");
/// assert_eq!(snapshot[0].params.depth, Some(1));
/// assert_eq!(snapshot[1].symbol(), "VALE3");
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh an entry.
    ///
    /// Returns `true` if the key was not present before.
    pub fn add(&self, entry: SubscriptionEntry) -> bool {
        self.state.lock().add(entry)
    }

    /// Insert or refresh several entries atomically.
    ///
    /// Returns the number of newly added keys.
    pub fn add_all(&self, entries: impl IntoIterator<Item = SubscriptionEntry>) -> usize {
        let mut state = self.state.lock();
        let mut added = 0;
        for entry in entries {
            if state.add(entry) {
                added += 1;
            }
        }
        added
    }

    /// Remove an entry by key.
    pub fn remove(&self, key: &SubscriptionKey) -> Option<SubscriptionEntry> {
        self.state.lock().remove(key)
    }

    /// Remove several keys atomically.
    ///
    /// Returns the number of keys that were present.
    pub fn remove_all(&self, keys: impl IntoIterator<Item = SubscriptionKey>) -> usize {
        let mut state = self.state.lock();
        keys.into_iter()
            .filter(|k| state.remove(k).is_some())
            .count()
    }

    /// Whether a key is registered.
    #[must_use]
    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.state.lock().index.contains_key(key)
    }

    /// Entries in first-insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SubscriptionEntry> {
        self.state.lock().ordered.values().cloned().collect()
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().ordered.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().ordered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;
    use crate::domain::streaming::CandleInterval;

    fn entry(symbol: &str, depth: Option<u8>) -> SubscriptionEntry {
        SubscriptionEntry {
            key: SubscriptionKey {
                symbol: symbol.to_string(),
                kind: StreamKind::Books,
                candle_type: None,
            },
            params: SubscriptionParams { depth },
        }
    }

    fn symbols(snapshot: &[SubscriptionEntry]) -> Vec<&str> {
        snapshot.iter().map(SubscriptionEntry::symbol).collect()
    }

    #[test]
    fn add_preserves_insertion_order() {
        let registry = SubscriptionRegistry::new();
        registry.add(entry("PETR4", None));
        registry.add(entry("VALE3", None));
        registry.add(entry("ITUB4", None));

        assert_eq!(symbols(&registry.snapshot()), ["PETR4", "VALE3", "ITUB4"]);
    }

    #[test]
    fn re_add_overwrites_params_in_place() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.add(entry("PETR4", Some(5))));
        assert!(registry.add(entry("VALE3", None)));
        assert!(!registry.add(entry("PETR4", Some(10))));

        let snapshot = registry.snapshot();
        assert_eq!(symbols(&snapshot), ["PETR4", "VALE3"]);
        assert_eq!(snapshot[0].params.depth, Some(10));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn remove_then_add_moves_to_end() {
        let registry = SubscriptionRegistry::new();
        registry.add(entry("PETR4", None));
        registry.add(entry("VALE3", None));

        let removed = registry.remove(&entry("PETR4", None).key);
        assert!(removed.is_some());
        registry.add(entry("PETR4", None));

        assert_eq!(symbols(&registry.snapshot()), ["VALE3", "PETR4"]);
    }

    #[test]
    fn remove_unknown_key_is_noop() {
        let registry = SubscriptionRegistry::new();
        registry.add(entry("PETR4", None));
        assert!(registry.remove(&entry("WEGE3", None).key).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn candle_types_are_distinct_keys() {
        let registry = SubscriptionRegistry::new();
        let kind = StreamKind::Candles(CandleInterval::OneMinute);
        let partial = SubscriptionRequest::new(
            kind,
            ["PETR4"],
            SubscribeOptions::with_candle_type(CandleType::Partial),
        )
        .unwrap();
        let closed = SubscriptionRequest::new(
            kind,
            ["PETR4"],
            SubscribeOptions::with_candle_type(CandleType::Closed),
        )
        .unwrap();

        assert_eq!(registry.add_all(partial.entries()), 1);
        assert_eq!(registry.add_all(closed.entries()), 1);
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.remove_all(partial.keys()), 1);
        assert!(registry.contains(&closed.keys().next().unwrap()));
    }

    #[test]
    fn request_trims_and_deduplicates() {
        let request = SubscriptionRequest::new(
            StreamKind::Trades,
            [" PETR4", "VALE3", "PETR4 "],
            SubscribeOptions::default(),
        )
        .unwrap();
        assert_eq!(request.symbols(), ["PETR4", "VALE3"]);
    }

    #[test_case(StreamKind::Trades, &[], SubscribeOptions::default(), ValidationError::EmptyInstrumentList; "empty list")]
    #[test_case(StreamKind::Trades, &["PETR4", "  "], SubscribeOptions::default(), ValidationError::BlankSymbol(1); "blank symbol")]
    #[test_case(StreamKind::Trades, &["PETR4"], SubscribeOptions::with_depth(5), ValidationError::DepthNotAllowed("trades".into()); "depth on trades")]
    #[test_case(StreamKind::Books, &["PETR4"], SubscribeOptions::with_depth(0), ValidationError::DepthOutOfRange(0); "depth zero")]
    #[test_case(StreamKind::Books, &["PETR4"], SubscribeOptions::with_depth(11), ValidationError::DepthOutOfRange(11); "depth eleven")]
    #[test_case(StreamKind::Books, &["PETR4"], SubscribeOptions::with_candle_type(CandleType::All), ValidationError::CandleTypeNotAllowed("books".into()); "candle type on books")]
    fn invalid_requests_rejected(
        kind: StreamKind,
        symbols: &[&str],
        options: SubscribeOptions,
        expected: ValidationError,
    ) {
        let result = SubscriptionRequest::new(kind, symbols.iter().copied(), options);
        assert_eq!(result, Err(expected));
    }

    #[test]
    fn news_streams_reject_subscriptions() {
        let result = SubscriptionRequest::new(
            StreamKind::News(crate::domain::streaming::Country::Brazil),
            ["PETR4"],
            SubscribeOptions::default(),
        );
        assert!(matches!(
            result,
            Err(ValidationError::UnsupportedAction { .. })
        ));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(usize, Option<u8>),
        Remove(usize),
    }

    const POOL: [&str; 5] = ["PETR4", "VALE3", "ITUB4", "BBAS3", "WEGE3"];

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..POOL.len(), proptest::option::of(1u8..=10)).prop_map(|(i, d)| Op::Add(i, d)),
            (0..POOL.len()).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn snapshot_matches_last_write_wins_model(ops in proptest::collection::vec(op_strategy(), 0..64)) {
            let registry = SubscriptionRegistry::new();
            let mut model: Vec<(&str, Option<u8>)> = Vec::new();

            for op in &ops {
                match *op {
                    Op::Add(i, depth) => {
                        registry.add(entry(POOL[i], depth));
                        if let Some(slot) = model.iter_mut().find(|slot| slot.0 == POOL[i]) {
                            slot.1 = depth;
                        } else {
                            model.push((POOL[i], depth));
                        }
                    }
                    Op::Remove(i) => {
                        registry.remove(&entry(POOL[i], None).key);
                        model.retain(|slot| slot.0 != POOL[i]);
                    }
                }
            }

            let snapshot: Vec<(String, Option<u8>)> = registry
                .snapshot()
                .into_iter()
                .map(|e| (e.key.symbol, e.params.depth))
                .collect();
            let expected: Vec<(String, Option<u8>)> = model
                .into_iter()
                .map(|(s, d)| (s.to_string(), d))
                .collect();
            prop_assert_eq!(snapshot, expected);
        }
    }
}
