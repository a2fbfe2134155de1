// src/convert.rs
//
// =============================================================================
// FLOWBRIDGE: CONVERSION SERVICE & STRATEGY REGISTRY
// =============================================================================
//
// Selects and drives the parser/generator pair for a (source, target)
// request. The service is stateless and may run concurrently with distinct
// inputs; per-conversion mutable state (ID map, used-ID set, iteration
// context) lives inside the active generator call and never escapes it.
//
// Routing is a data-driven allow-list, not hardcoded in the strategies:
// adding a platform means registering one more triple, the hub policy stays
// here.

use crate::error::{ConvertError, Result, Warning, Warnings};
use crate::idmap::{IdSource, SeededIds, SystemIds};
use crate::model::Document;
use crate::platforms::coze::{CozeGenerator, CozeParser};
use crate::platforms::dify::{DifyGenerator, DifyParser};
use crate::platforms::iflytek::{IFlytekGenerator, IFlytekParser};
use crate::platforms::Platform;
use crate::validate;
use std::collections::{HashMap, HashSet};

// ============================================================================
// 1. STRATEGY CONTRACTS
// ============================================================================

/// Lifts platform bytes into the unified model. Deterministic on identical
/// input; no global state beyond the type-system tables.
pub trait PlatformParser: Send + Sync {
    fn parse(&self, bytes: &[u8], warnings: &mut Warnings) -> Result<Document>;
}

/// Lowers a unified model to platform bytes. Never mutates the document.
pub trait PlatformGenerator: Send + Sync {
    fn generate(
        &self,
        doc: &Document,
        ids: &mut dyn IdSource,
        warnings: &mut Warnings,
    ) -> Result<Vec<u8>>;
}

pub struct Strategy {
    pub parser: Box<dyn PlatformParser>,
    pub generator: Box<dyn PlatformGenerator>,
}

// ============================================================================
// 2. REGISTRY
// ============================================================================

pub struct StrategyRegistry {
    strategies: HashMap<Platform, Strategy>,
    hub: Platform,
    allowed: HashSet<(Platform, Platform)>,
}

impl StrategyRegistry {
    /// Empty registry with the hub-and-spoke policy for `hub`.
    pub fn new(hub: Platform) -> Self {
        Self {
            strategies: HashMap::new(),
            hub,
            allowed: HashSet::new(),
        }
    }

    /// The standard three-platform setup: iFlytek hub, Dify and Coze spokes.
    pub fn standard() -> Self {
        let mut registry = Self::new(Platform::hub());
        registry.register(
            Platform::IFlytek,
            Strategy {
                parser: Box::new(IFlytekParser),
                generator: Box::new(IFlytekGenerator),
            },
        );
        registry.register(
            Platform::Dify,
            Strategy {
                parser: Box::new(DifyParser),
                generator: Box::new(DifyGenerator::default()),
            },
        );
        registry.register(
            Platform::Coze,
            Strategy {
                parser: Box::new(CozeParser),
                generator: Box::new(CozeGenerator),
            },
        );
        registry
    }

    /// Register a platform. Paths to and from the hub are allowed
    /// automatically; spoke-to-spoke stays closed.
    pub fn register(&mut self, platform: Platform, strategy: Strategy) {
        if platform != self.hub {
            self.allowed.insert((self.hub, platform));
            self.allowed.insert((platform, self.hub));
        }
        self.strategies.insert(platform, strategy);
    }

    pub fn strategy(&self, platform: Platform) -> Option<&Strategy> {
        self.strategies.get(&platform)
    }

    /// Enforce the routing policy for a requested pair.
    pub fn route(&self, from: Platform, to: Platform) -> Result<()> {
        if from == to {
            return Err(ConvertError::SameSource { platform: from });
        }
        if !self.allowed.contains(&(from, to)) {
            return Err(ConvertError::UnsupportedPath {
                from,
                to,
                hub: self.hub,
            });
        }
        Ok(())
    }
}

// ============================================================================
// 3. ID POLICY
// ============================================================================

/// Where generator randomness comes from. `Seeded` makes two conversions of
/// the same bytes byte-identical — used by tests and reproducible batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPolicy {
    System,
    Seeded(u64),
}

impl IdPolicy {
    fn source(self) -> Box<dyn IdSource> {
        match self {
            IdPolicy::System => Box::new(SystemIds::new()),
            IdPolicy::Seeded(seed) => Box::new(SeededIds::new(seed)),
        }
    }
}

// ============================================================================
// 4. THE SERVICE
// ============================================================================

#[derive(Debug)]
pub struct ConversionOutcome {
    pub bytes: Vec<u8>,
    pub warnings: Vec<Warning>,
}

pub struct ConversionService {
    registry: StrategyRegistry,
    id_policy: IdPolicy,
}

impl Default for ConversionService {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionService {
    pub fn new() -> Self {
        Self {
            registry: StrategyRegistry::standard(),
            id_policy: IdPolicy::System,
        }
    }

    pub fn with_registry(registry: StrategyRegistry) -> Self {
        Self {
            registry,
            id_policy: IdPolicy::System,
        }
    }

    pub fn with_id_policy(mut self, policy: IdPolicy) -> Self {
        self.id_policy = policy;
        self
    }

    /// parse -> structural validation -> generate.
    pub fn convert(&self, bytes: &[u8], from: Platform, to: Platform) -> Result<ConversionOutcome> {
        self.registry.route(from, to)?;

        let parser = self.strategy(from)?;
        let generator = self.strategy(to)?;

        let mut warnings = Warnings::new();
        let doc = parser.parser.parse(bytes, &mut warnings)?;
        log::info!(
            "📐 parsed {} document '{}': {} node(s), {} edge(s)",
            from,
            doc.metadata.name,
            doc.workflow.nodes.len(),
            doc.workflow.edges.len()
        );

        validate::validate_document(&doc)?;

        let mut ids = self.id_policy.source();
        let out = generator
            .generator
            .generate(&doc, ids.as_mut(), &mut warnings)?;
        log::info!("✅ generated {} document ({} bytes)", to, out.len());

        Ok(ConversionOutcome {
            bytes: out,
            warnings: warnings.into_vec(),
        })
    }

    /// Convert with the source platform auto-detected from the bytes.
    pub fn convert_detected(&self, bytes: &[u8], to: Platform) -> Result<ConversionOutcome> {
        let from = crate::detect::detect_platform(bytes);
        log::info!("🔎 detected source platform: {from}");
        self.convert(bytes, from, to)
    }

    /// Parse + structural validation, no generation. Returns the warnings.
    pub fn validate(&self, bytes: &[u8], from: Platform) -> Result<Vec<Warning>> {
        let parser = self.strategy(from)?;
        let mut warnings = Warnings::new();
        let doc = parser.parser.parse(bytes, &mut warnings)?;
        validate::validate_document(&doc)?;
        Ok(warnings.into_vec())
    }

    /// Parse only; used by tests asserting on the unified model.
    pub fn parse(&self, bytes: &[u8], from: Platform) -> Result<(Document, Vec<Warning>)> {
        let parser = self.strategy(from)?;
        let mut warnings = Warnings::new();
        let doc = parser.parser.parse(bytes, &mut warnings)?;
        Ok((doc, warnings.into_vec()))
    }

    fn strategy(&self, platform: Platform) -> Result<&Strategy> {
        self.registry.strategy(platform).ok_or_else(|| {
            ConvertError::input(platform, "no strategy registered for this platform")
        })
    }
}
