//! Ordered fallback over token providers.

use crate::error::{PipelineError, ProviderError, ProviderErrorCode};
use crate::llm_bridge::{ProviderCatalog, build_provider, provider_availability};
use crate::vocabulary::TokenVocabulary;
use log::{info, warn};
use plasmid_protocol::TokenSelection;
use std::ops::ControlFlow;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// One way of turning prompt text into a token selection.
pub trait TokenProvider: Send + Sync {
    fn id(&self) -> &str;

    /// Must not carry state between calls.
    fn convert(
        &self,
        text: &str,
        vocabulary: &TokenVocabulary,
    ) -> Result<TokenSelection, ProviderError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSuccess {
    pub provider: String,
    pub selection: TokenSelection,
    /// Providers tried and failed before the winner, in order.
    pub failures: Vec<ProviderError>,
}

pub struct ProviderManager {
    providers: Vec<Box<dyn TokenProvider>>,
    skipped: Vec<(String, String)>,
}

impl ProviderManager {
    pub fn new(providers: Vec<Box<dyn TokenProvider>>) -> Self {
        Self {
            providers,
            skipped: Vec::new(),
        }
    }

    /// Builds adapters for every available catalog entry, in catalog order.
    /// Unavailable entries are remembered so the startup check can name them.
    pub fn from_catalog(catalog: &ProviderCatalog) -> Self {
        let mut providers = Vec::new();
        let mut skipped = Vec::new();
        for spec in &catalog.providers {
            let availability = provider_availability(spec);
            if !availability.available {
                let reason = availability.reason.unwrap_or_default();
                info!("Token provider '{}' skipped: {reason}", spec.id);
                skipped.push((spec.id.clone(), reason));
                continue;
            }
            match build_provider(spec) {
                Ok(provider) => providers.push(provider),
                Err(e) => {
                    warn!("{e}");
                    skipped.push((spec.id.clone(), e.message));
                }
            }
        }
        Self { providers, skipped }
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id().to_string()).collect()
    }

    pub fn skipped(&self) -> &[(String, String)] {
        &self.skipped
    }

    /// Fails when no provider could be built at all.
    pub fn ensure_configured(&self) -> Result<(), PipelineError> {
        if !self.providers.is_empty() {
            return Ok(());
        }
        let detail = if self.skipped.is_empty() {
            "no providers are listed in the catalog".to_string()
        } else {
            self.skipped
                .iter()
                .map(|(id, reason)| format!("{id}: {reason}"))
                .collect::<Vec<_>>()
                .join("; ")
        };
        Err(PipelineError::NoProviderConfigured(detail))
    }

    /// Tries providers in order and stops at the first one whose selection
    /// passes vocabulary validation. Later providers are never invoked.
    pub fn select_tokens(
        &self,
        text: &str,
        vocabulary: &TokenVocabulary,
    ) -> Result<ProviderSuccess, PipelineError> {
        let outcome = self.providers.iter().try_fold(
            Vec::new(),
            |mut failures: Vec<ProviderError>, provider| match Self::attempt(
                provider.as_ref(),
                text,
                vocabulary,
            ) {
                Ok(selection) => ControlFlow::Break(ProviderSuccess {
                    provider: provider.id().to_string(),
                    selection,
                    failures,
                }),
                Err(e) => {
                    warn!("{e}");
                    failures.push(e);
                    ControlFlow::Continue(failures)
                }
            },
        );
        match outcome {
            ControlFlow::Break(success) => {
                info!(
                    "Tokens selected by '{}' ({} condition tokens, {} provider(s) failed first)",
                    success.provider,
                    success.selection.len(),
                    success.failures.len()
                );
                Ok(success)
            }
            ControlFlow::Continue(failures) => {
                Err(PipelineError::NoProviderAvailable { failures })
            }
        }
    }

    fn attempt(
        provider: &dyn TokenProvider,
        text: &str,
        vocabulary: &TokenVocabulary,
    ) -> Result<TokenSelection, ProviderError> {
        let selection = catch_unwind(AssertUnwindSafe(|| provider.convert(text, vocabulary)))
            .map_err(|payload| {
                ProviderError::new(
                    provider.id(),
                    ProviderErrorCode::Internal,
                    format!("provider panicked: {}", panic_message(payload.as_ref())),
                )
            })??;
        vocabulary.validate_selection(&selection).map_err(|e| {
            ProviderError::new(provider.id(), ProviderErrorCode::VocabularyViolation, e)
        })?;
        Ok(selection)
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Fail,
        Panic,
        Hallucinate,
        Succeed,
    }

    struct MockProvider {
        id: String,
        behaviour: Behaviour,
        calls: Arc<AtomicUsize>,
    }

    impl MockProvider {
        fn boxed(id: &str, behaviour: Behaviour) -> (Box<dyn TokenProvider>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let provider = Self {
                id: id.to_string(),
                behaviour,
                calls: calls.clone(),
            };
            (Box::new(provider), calls)
        }
    }

    impl TokenProvider for MockProvider {
        fn id(&self) -> &str {
            &self.id
        }

        fn convert(
            &self,
            _text: &str,
            _vocabulary: &TokenVocabulary,
        ) -> Result<TokenSelection, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut selection = TokenSelection::default();
            match self.behaviour {
                Behaviour::Fail => Err(ProviderError::new(
                    &self.id,
                    ProviderErrorCode::Transient,
                    "service unavailable",
                )),
                Behaviour::Panic => panic!("adapter bug"),
                Behaviour::Hallucinate => {
                    selection.host = Some("<HOST:MARS>".to_string());
                    Ok(selection)
                }
                Behaviour::Succeed => {
                    selection.host = Some("<HOST:ECOLI>".to_string());
                    Ok(selection)
                }
            }
        }
    }

    fn vocab() -> TokenVocabulary {
        TokenVocabulary::builtin().expect("vocabulary")
    }

    #[test]
    fn first_success_wins_and_later_providers_are_untouched() {
        let (a, a_calls) = MockProvider::boxed("a", Behaviour::Fail);
        let (b, b_calls) = MockProvider::boxed("b", Behaviour::Succeed);
        let (c, c_calls) = MockProvider::boxed("c", Behaviour::Succeed);
        let manager = ProviderManager::new(vec![a, b, c]);
        let success = manager.select_tokens("anything", &vocab()).expect("success");
        assert_eq!(success.provider, "b");
        assert_eq!(success.failures.len(), 1);
        assert_eq!(success.failures[0].provider, "a");
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
        assert_eq!(c_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn out_of_vocabulary_tokens_count_as_failure() {
        let (a, _) = MockProvider::boxed("a", Behaviour::Hallucinate);
        let (b, _) = MockProvider::boxed("b", Behaviour::Succeed);
        let manager = ProviderManager::new(vec![a, b]);
        let success = manager.select_tokens("x", &vocab()).expect("success");
        assert_eq!(success.provider, "b");
        assert_eq!(
            success.failures[0].code,
            ProviderErrorCode::VocabularyViolation
        );
    }

    #[test]
    fn panicking_provider_is_contained() {
        let (a, _) = MockProvider::boxed("a", Behaviour::Panic);
        let (b, _) = MockProvider::boxed("b", Behaviour::Succeed);
        let manager = ProviderManager::new(vec![a, b]);
        let success = manager.select_tokens("x", &vocab()).expect("success");
        assert_eq!(success.failures[0].code, ProviderErrorCode::Internal);
        assert!(success.failures[0].message.contains("adapter bug"));
    }

    #[test]
    fn exhausting_all_providers_reports_every_failure() {
        let (a, _) = MockProvider::boxed("a", Behaviour::Fail);
        let (b, _) = MockProvider::boxed("b", Behaviour::Hallucinate);
        let manager = ProviderManager::new(vec![a, b]);
        match manager.select_tokens("x", &vocab()) {
            Err(PipelineError::NoProviderAvailable { failures }) => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[1].provider, "b");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn empty_manager_is_not_configured() {
        let manager = ProviderManager::new(Vec::new());
        assert!(matches!(
            manager.ensure_configured(),
            Err(PipelineError::NoProviderConfigured(_))
        ));
    }

    #[test]
    fn catalog_with_only_offline_matcher_is_configured() {
        let mut catalog = ProviderCatalog::builtin().expect("catalog");
        for spec in &mut catalog.providers {
            spec.enabled = false;
        }
        catalog.enable("keywords");
        let manager = ProviderManager::from_catalog(&catalog);
        assert_eq!(manager.provider_ids(), vec!["keywords".to_string()]);
        assert!(manager.ensure_configured().is_ok());
        assert!(!manager.skipped().is_empty());
    }
}
