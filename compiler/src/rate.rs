// rate.rs — Multirate guards, the rate-boundary stack, and domain bridges
//
// When consecutive atoms of one domain declare different explicit rates,
// the code of the faster/slower atom is wrapped in a phase-accumulator
// guard. Each open guard is a `RateBoundary` on the context's `RateStack`;
// code emitted for its domain accumulates in the boundary until it closes,
// at which point the guard text is rendered through the emitter.
//
// Preconditions: rates are strictly positive.
// Postconditions: a closed boundary yields exactly one guard fragment in the
//   domain that opened it.
// Failure modes: none here; stack balance is checked by the stream driver.
// Side effects: none.

use crate::emitter::{ratio_literal, real_literal, CodeEmitter};
use crate::id::BoundaryId;
use crate::tree::{BinaryOp, DomainKey, ValueType};

// ── Guard arithmetic ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardKind {
    /// Child slower than parent: conditional execution.
    Downsample,
    /// Child faster than parent: repeated execution.
    Upsample,
}

/// Phase-accumulator conversion from `parent_rate` activations to `rate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateGuard {
    pub rate: f64,
    pub parent_rate: f64,
}

impl RateGuard {
    /// A guard is needed only between two distinct positive rates.
    pub fn new(rate: f64, parent_rate: f64) -> Option<Self> {
        if rate > 0.0 && parent_rate > 0.0 && rate != parent_rate {
            Some(RateGuard { rate, parent_rate })
        } else {
            None
        }
    }

    pub fn kind(&self) -> GuardKind {
        if self.rate < self.parent_rate {
            GuardKind::Downsample
        } else {
            GuardKind::Upsample
        }
    }

    pub fn initial_counter(&self) -> f64 {
        match self.kind() {
            GuardKind::Downsample => 1.0,
            GuardKind::Upsample => 0.0,
        }
    }

    /// Amount added to the counter: once per parent activation when
    /// downsampling, once per body run when upsampling.
    pub fn increment(&self) -> f64 {
        match self.kind() {
            GuardKind::Downsample => self.rate / self.parent_rate,
            GuardKind::Upsample => self.parent_rate / self.rate,
        }
    }

    /// Body executions per parent activation, using the same arithmetic the
    /// generated guard performs.
    pub fn simulate(&self, activations: usize) -> Vec<u32> {
        let inc = self.increment();
        let mut counter = self.initial_counter();
        let mut runs = Vec::with_capacity(activations);
        for _ in 0..activations {
            let mut n = 0;
            match self.kind() {
                GuardKind::Downsample => {
                    if counter >= 1.0 {
                        counter -= 1.0;
                        n = 1;
                    }
                    counter += inc;
                }
                GuardKind::Upsample => {
                    while counter < 1.0 {
                        n += 1;
                        counter += inc;
                    }
                    counter -= 1.0;
                }
            }
            runs.push(n);
        }
        runs
    }

    /// Wrap `body` in the guard driven by `counter`.
    pub fn render(&self, counter: &str, body: &str, emitter: &dyn CodeEmitter) -> String {
        let step = ratio_literal(self.increment());
        let one = real_literal(1.0);
        let mut code = emitter.comment(&format!("rate {} within {}", self.rate, self.parent_rate));
        match self.kind() {
            GuardKind::Downsample => {
                let mut inner = emitter.increment(counter, &real_literal(-1.0));
                inner.push_str(body);
                let cond = emitter.binary(BinaryOp::GreaterEqual, counter, &one);
                code.push_str(&emitter.conditional(&cond, &inner));
                code.push_str(&emitter.increment(counter, &step));
            }
            GuardKind::Upsample => {
                let mut inner = body.to_string();
                inner.push_str(&emitter.increment(counter, &step));
                let cond = emitter.binary(BinaryOp::Lesser, counter, &one);
                code.push_str(&emitter.while_loop(&cond, &inner));
                code.push_str(&emitter.increment(counter, &real_literal(-1.0)));
            }
        }
        code
    }
}

pub fn counter_name(id: BoundaryId) -> String {
    format!("_counter_{}", id)
}

// ── Boundary stack ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RateBoundary {
    pub id: BoundaryId,
    pub guard: RateGuard,
    /// Domain that opened the boundary; its guard is emitted there.
    pub domain: DomainKey,
    /// Serial of the stream that opened the boundary.
    pub owner: usize,
    pub body: String,
}

impl RateBoundary {
    pub fn counter(&self) -> String {
        counter_name(self.id)
    }

    /// Header declaration and run-once initialization of the counter.
    pub fn counter_code(&self, emitter: &dyn CodeEmitter) -> (String, String) {
        let counter = self.counter();
        (
            emitter.declare_scalar(&counter, ValueType::Real),
            emitter.assign(&counter, &real_literal(self.guard.initial_counter()), None),
        )
    }
}

#[derive(Debug, Default)]
pub struct RateStack {
    frames: Vec<RateBoundary>,
}

impl RateStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn open(&mut self, boundary: RateBoundary) {
        log::debug!(
            "rate: open boundary {} ({} within {}) in {:?}",
            boundary.id,
            boundary.guard.rate,
            boundary.guard.parent_rate,
            boundary.domain
        );
        self.frames.push(boundary);
    }

    pub fn top(&self) -> Option<&RateBoundary> {
        self.frames.last()
    }

    /// Pop the innermost boundary and render its guard.
    pub fn close_top(&mut self, emitter: &dyn CodeEmitter) -> Option<(RateBoundary, String)> {
        let boundary = self.frames.pop()?;
        log::debug!("rate: close boundary {} in {:?}", boundary.id, boundary.domain);
        let text = boundary.guard.render(&boundary.counter(), &boundary.body, emitter);
        Some((boundary, text))
    }

    /// Innermost boundary of `domain` opened by stream `owner`; code for
    /// that domain belongs inside it.
    pub fn container_mut(&mut self, domain: &DomainKey, owner: usize) -> Option<&mut RateBoundary> {
        self.frames
            .iter_mut()
            .rev()
            .find(|b| b.owner == owner && &b.domain == domain)
    }

    /// Rate of the innermost boundary of `domain` opened by `owner`.
    pub fn innermost_rate(&self, domain: &DomainKey, owner: usize) -> Option<f64> {
        self.frames
            .iter()
            .rev()
            .find(|b| b.owner == owner && &b.domain == domain)
            .map(|b| b.guard.rate)
    }

    /// True when the innermost boundary belongs to `owner`.
    pub fn top_owned_by(&self, owner: usize) -> bool {
        self.top().map_or(false, |b| b.owner == owner)
    }
}

// ── Transition planning ─────────────────────────────────────────────────────

/// Indices of the atoms at which the explicit rate changes, walking left to
/// right from `base` (the domain's default rate). The first explicit rate
/// seen becomes the base when the domain has none.
pub fn plan_transitions(rates: &[Option<f64>], base: Option<f64>) -> Vec<usize> {
    let mut current = base;
    let mut transitions = Vec::new();
    for (i, rate) in rates.iter().enumerate() {
        let Some(r) = rate.filter(|r| *r > 0.0) else {
            continue;
        };
        match current {
            None => current = Some(r),
            Some(c) if c != r => {
                transitions.push(i);
                current = Some(r);
            }
            Some(_) => {}
        }
    }
    transitions
}

// ── Signal bridges ──────────────────────────────────────────────────────────

/// Storage name of a bridge cell, qualified by both endpoint domains so
/// bridges sharing an endpoint never collide.
pub fn bridge_handle(name: &str, input_domain: &DomainKey, output_domain: &DomainKey) -> String {
    let part = |d: &DomainKey| d.clone().unwrap_or_else(|| "none".to_string());
    format!("{}_{}_{}", name, part(input_domain), part(output_domain))
}
