use crate::interaction::{Interaction, InteractionBody};
use crate::observer::{ConversationObserver, SessionError};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Render boundary: the aggregator upserts stable dialog entries here.
/// Upserting the same key replaces the entry in place.
pub trait DialogSink: Send {
    fn upsert(&mut self, key: &str, interaction: &Interaction);
}

/// Records every upsert in memory (for testing).
#[derive(Debug, Default)]
pub struct CollectSink {
    upserts: Vec<(String, Interaction)>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upserts(&self) -> &[(String, Interaction)] {
        &self.upserts
    }

    /// Latest interaction rendered under `key`.
    pub fn last(&self, key: &str) -> Option<&Interaction> {
        self.upserts
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, i)| i)
    }

    pub fn render_count(&self, key: &str) -> usize {
        self.upserts.iter().filter(|(k, _)| k == key).count()
    }

    /// Distinct keys in first-render order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for (k, _) in &self.upserts {
            if !keys.contains(k) {
                keys.push(k.clone());
            }
        }
        keys
    }
}

impl DialogSink for CollectSink {
    fn upsert(&mut self, key: &str, interaction: &Interaction) {
        self.upserts.push((key.to_string(), interaction.clone()));
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AggregatorOptions {
    /// Minimum interval between renders of one stream key. Skipped renders
    /// lose no data; the next allowed render carries the full state.
    pub throttle: Duration,
    /// Prefix length used to tell a growing message apart from a new one.
    pub seed_len: usize,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(100),
            seed_len: 24,
        }
    }
}

/// Per-stream accumulator. Lives from the first chunk of a message until
/// the turn finalizes or errors.
#[derive(Debug)]
struct StreamState {
    started: bool,
    aggregated: Interaction,
}

#[derive(Debug)]
struct Seed {
    prefix: String,
    segment: u32,
}

/// Folds partial/delta interaction events into stable, de-duplicated dialog
/// entries keyed `turn:{id}:{agent}:seg{n}`.
///
/// Coalescing per text field: an incoming chunk that extends the aggregate
/// replaces it (cumulative providers), a chunk the aggregate already covers
/// is ignored (regression/noise would visibly trim the bubble), anything
/// else is appended (incremental deltas).
pub struct DialogAggregator<S> {
    sink: S,
    options: AggregatorOptions,
    streams: HashMap<String, StreamState>,
    seeds: HashMap<String, Seed>,
    last_render: HashMap<String, Instant>,
    event_seq: u64,
}

impl<S: DialogSink> DialogAggregator<S> {
    pub fn new(sink: S) -> Self {
        Self::with_options(sink, AggregatorOptions::default())
    }

    pub fn with_options(sink: S, options: AggregatorOptions) -> Self {
        Self {
            sink,
            options,
            streams: HashMap::new(),
            seeds: HashMap::new(),
            last_render: HashMap::new(),
            event_seq: 0,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Fold one text event into its stream. `allow_segmentation` is set for
    /// partial snapshots: a snapshot whose opening text matches nothing we
    /// have seen starts a new message bubble within the turn. Incremental
    /// deltas never re-segment; they extend the current message by design.
    fn ingest_text(&mut self, interaction: Interaction, allow_segmentation: bool) {
        let base = base_key(interaction.turn_id, &interaction.agent.to_string());
        let fresh = seed_of(&interaction, self.options.seed_len);

        let seed = self.seeds.entry(base.clone()).or_insert_with(|| Seed {
            prefix: String::new(),
            segment: 0,
        });
        if allow_segmentation
            && !fresh.is_empty()
            && !seed.prefix.is_empty()
            && !fresh.starts_with(&seed.prefix)
            && !seed.prefix.starts_with(&fresh)
        {
            seed.segment += 1;
            seed.prefix.clear();
            debug!(base = %base, segment = seed.segment, "new message segment");
        }
        let segment = seed.segment;

        let key = stream_key(&base, segment);
        let state = self
            .streams
            .entry(key.clone())
            .or_insert_with(|| StreamState {
                started: false,
                aggregated: interaction.clone(),
            });
        if !state.started {
            state.started = true;
            state.aggregated = interaction;
            // No metrics while streaming: a zero would be a lie.
            state.aggregated.metrics = None;
        } else {
            if let (
                InteractionBody::Text { content, reasoning },
                InteractionBody::Text {
                    content: in_content,
                    reasoning: in_reasoning,
                },
            ) = (&mut state.aggregated.body, &interaction.body)
            {
                coalesce(content, in_content);
                if let Some(in_r) = in_reasoning {
                    match reasoning {
                        Some(r) => coalesce(r, in_r),
                        None => *reasoning = Some(in_r.clone()),
                    }
                }
            }
            state.aggregated.time = interaction.time;
            state.aggregated.metrics = None;
        }

        let agg_seed = seed_of(&state.aggregated, self.options.seed_len);
        if !agg_seed.is_empty() {
            if let Some(seed) = self.seeds.get_mut(&base) {
                if seed.prefix.len() < agg_seed.len() {
                    seed.prefix = agg_seed;
                }
            }
        }

        self.maybe_render(&key);
    }

    /// Render unless the key rendered within the throttle window. State is
    /// kept either way, so a skipped render is caught up by the next one.
    fn maybe_render(&mut self, key: &str) {
        let now = Instant::now();
        let due = self
            .last_render
            .get(key)
            .map_or(true, |t| now.duration_since(*t) >= self.options.throttle);
        if !due {
            return;
        }
        if let Some(state) = self.streams.get(key) {
            self.sink.upsert(key, &state.aggregated);
            self.last_render.insert(key.to_string(), now);
        }
    }

    /// Non-streaming events render once under their own key.
    fn passthrough(&mut self, interaction: Interaction) {
        let base = base_key(interaction.turn_id, &interaction.agent.to_string());
        let key = format!("{base}:evt{}", self.event_seq);
        self.event_seq += 1;
        self.sink.upsert(&key, &interaction);
    }

    /// Drop every stream, seed, and render record belonging to one turn.
    fn clear_turn(&mut self, prefix: &str) {
        self.streams.retain(|k, _| !k.starts_with(prefix));
        self.seeds.retain(|k, _| !k.starts_with(prefix));
        self.last_render.retain(|k, _| !k.starts_with(prefix));
    }
}

impl<S: DialogSink> ConversationObserver for DialogAggregator<S> {
    fn on_start(&mut self, turn_id: Option<Uuid>) {
        // A fresh turn must not inherit stale streams from a crashed one.
        self.clear_turn(&turn_prefix(turn_id));
        debug!(turn = %turn_prefix(turn_id), "turn started");
    }

    fn on_delta(&mut self, interaction: Interaction) {
        if !matches!(interaction.body, InteractionBody::Text { .. }) {
            self.passthrough(interaction);
            return;
        }
        self.ingest_text(interaction, false);
    }

    fn on_partial(&mut self, interaction: Interaction) {
        if !matches!(interaction.body, InteractionBody::Text { .. }) {
            self.passthrough(interaction);
            return;
        }
        self.ingest_text(interaction, true);
    }

    fn on_tool_call(&mut self, interaction: Interaction) {
        self.passthrough(interaction);
    }

    fn on_tool_result(&mut self, interaction: Interaction) {
        self.passthrough(interaction);
    }

    fn on_final(&mut self, interaction: Interaction) {
        let prefix = turn_prefix(interaction.turn_id);
        let base = base_key(interaction.turn_id, &interaction.agent.to_string());
        let segment = self.seeds.get(&base).map_or(0, |s| s.segment);
        let key = stream_key(&base, segment);

        let rendered = if let Some(mut state) = self.streams.remove(&key) {
            // Keep the streamed content the user already saw; the final
            // event only contributes authoritative metrics and time.
            state.aggregated.metrics = interaction.metrics;
            state.aggregated.time = interaction.time;
            state.aggregated
        } else {
            interaction
        };
        // Finals always render; throttling only applies mid-stream.
        self.sink.upsert(&key, &rendered);
        self.clear_turn(&prefix);
    }

    fn on_error(&mut self, turn_id: Option<Uuid>, error: SessionError) {
        let prefix = turn_prefix(turn_id);
        self.clear_turn(&prefix);
        let message = match error {
            SessionError::Cancelled => "Cancelled.".to_string(),
            SessionError::Failure(message) => message,
        };
        let interaction = Interaction::error(turn_id, message);
        let key = format!("{prefix}:error");
        self.sink.upsert(&key, &interaction);
    }
}

fn turn_prefix(turn_id: Option<Uuid>) -> String {
    match turn_id {
        Some(id) => format!("turn:{id}"),
        None => "turn:live".to_string(),
    }
}

fn base_key(turn_id: Option<Uuid>, agent: &str) -> String {
    format!("{}:{agent}", turn_prefix(turn_id))
}

fn stream_key(base: &str, segment: u32) -> String {
    format!("{base}:seg{segment}")
}

/// Opening text of an interaction, truncated to `seed_len` characters.
/// Content wins over reasoning; both empty yields an empty seed.
fn seed_of(interaction: &Interaction, seed_len: usize) -> String {
    let text = match interaction.content() {
        Some(c) if !c.is_empty() => c,
        _ => interaction.reasoning().unwrap_or(""),
    };
    text.chars().take(seed_len).collect()
}

/// The coalescing rule, applied to one text field.
fn coalesce(current: &mut String, incoming: &str) {
    if incoming.is_empty() {
        return;
    }
    if incoming.starts_with(current.as_str()) {
        // Cumulative provider: the chunk carries the whole message so far.
        *current = incoming.to_string();
    } else if current.starts_with(incoming) {
        // Regression or duplicate; replacing would visibly trim the bubble.
    } else {
        current.push_str(incoming);
    }
}
