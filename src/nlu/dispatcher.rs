//! Dispatcher — the top-level decision pipeline for one utterance.
//!
//! Routing depends on prior turns: an active context in an action loop or
//! with recorded slots short-circuits straight into the matching
//! sub-state-machine; otherwise the main classifier runs and the normal
//! path executes the selected skill action.

use std::collections::HashMap;
use std::time::Instant;
use tracing::{error, info, warn};

use super::fallback::match_fallback;
use super::types::{
    intent_segments, Classification, CompletedTurn, NluResult, ProcessOutcome,
};
use super::{NluError, NluSession};
use crate::classifier::{ClassificationOutcome, IntentClassifier};
use crate::config::{read_json, SkillConfig};
use crate::conversation::{ActiveContext, NextAction};
use crate::ner::NerSeverity;

/// Alternates scoring above this may steal the classification when they
/// belong to the active context.
const CONTEXT_REPICK_THRESHOLD: f64 = 0.6;

/// How one internal turn resolved: either a final outcome, or an
/// instruction to run the pipeline again with another utterance.
#[derive(Debug)]
pub enum TurnFlow {
    Done(ProcessOutcome),
    Redispatch(String),
}

/// Where the turn goes after looking at the active context.
enum Route {
    ActionLoop,
    SlotFilling,
    Classify,
}

impl NluSession {
    /// Process one user utterance and drive the conversation one step.
    ///
    /// Returns the executed skill's output, a consumed-turn marker (slot
    /// question asked, language switch in flight, context dropped), or an
    /// intent-not-found report.
    pub async fn process(&self, utterance: &str) -> Result<ProcessOutcome, NluError> {
        let started = Instant::now();
        let mut current = utterance.to_string();
        // Trampoline: out-of-topic exits and skill restarts re-enter the
        // pipeline here instead of recursing.
        let outcome = loop {
            match self.process_turn(&current).await? {
                TurnFlow::Done(outcome) => break outcome,
                TurnFlow::Redispatch(next) => current = next,
            }
        };
        Ok(finalize(outcome, started))
    }

    async fn process_turn(&self, utterance: &str) -> Result<TurnFlow, NluError> {
        if !self.models.is_ready().await {
            let phrase = self.brain.wernicke("random_errors", None, &HashMap::new());
            self.brain.talk(&phrase, false).await;
            self.socket.is_typing(false);
            return Err(NluError::ModelsNotReady);
        }
        self.socket.is_typing(true);

        let lang = self.current_lang().await;

        // Teach the main model any proper nouns in the utterance before
        // classification. A failure here never fails the turn.
        if let Err(err) = self.ner.merge_spacy_entities(&lang, utterance).await {
            warn!("spaCy merge skipped: {err}");
        }

        let route = {
            let store = self.conversation.lock().await;
            match store.active_context() {
                Some(ctx) if ctx.is_in_action_loop => Route::ActionLoop,
                Some(ctx) if !ctx.slots.is_empty() => Route::SlotFilling,
                _ => Route::Classify,
            }
        };
        match route {
            Route::ActionLoop => return self.handle_action_loop(utterance).await,
            Route::SlotFilling => return self.handle_slot_filling(utterance).await,
            Route::Classify => {}
        }

        let main = self.models.main().await.ok_or(NluError::ModelsNotReady)?;
        let outcome = self.classify_guarded(&main, utterance).await?;

        let (mut intent, mut score) = (outcome.intent.clone(), outcome.score);

        // Context-biased re-pick: an alternate scoring above the threshold
        // that belongs to the active context beats the top classification.
        {
            let store = self.conversation.lock().await;
            if let Some(ctx) = store.active_context() {
                for alt in &outcome.classifications {
                    if alt.score > CONTEXT_REPICK_THRESHOLD {
                        if let Some(owner) = main.intent_domain(&outcome.locale, &alt.intent) {
                            if owner == ctx.name {
                                intent = alt.intent.clone();
                                score = alt.score;
                            }
                        }
                    }
                }
            }
        }

        if !self.languages.is_supported(&outcome.locale) {
            let phrase = self
                .brain
                .wernicke("random_language_not_supported", None, &HashMap::new());
            self.brain.talk(&phrase, false).await;
            self.socket.is_typing(false);
            return Ok(TurnFlow::Done(ProcessOutcome::Consumed));
        }

        if outcome.locale != lang {
            self.switch_language(utterance, &outcome.locale).await;
            return Ok(TurnFlow::Done(ProcessOutcome::Consumed));
        }

        let classification = if intent == "None" || intent.is_empty() {
            None
        } else {
            resolve_classification(main.as_ref(), &outcome, &intent, score)
        };

        let mut nlu_result = match classification {
            Some(classification) => NluResult {
                utterance: utterance.to_string(),
                answers: outcome.answers.clone(),
                classification,
                ..Default::default()
            },
            None => match match_fallback(utterance, self.languages.fallbacks(&lang)) {
                Some(fb) => fb,
                None => {
                    let phrase =
                        self.brain
                            .wernicke("random_unknown_intents", None, &HashMap::new());
                    self.brain.talk(&phrase, false).await;
                    self.socket.is_typing(false);
                    return Ok(TurnFlow::Done(ProcessOutcome::NotFound {
                        processing_time: 0,
                        message: "Intent not found",
                    }));
                }
            },
        };

        let (domain, skill, action) = (
            nlu_result.classification.domain.clone(),
            nlu_result.classification.skill.clone(),
            nlu_result.classification.action.clone(),
        );
        let intent = format!("{skill}.{action}");
        info!("intent found: {intent} (score {score:.2})");
        self.telemetry
            .report(utterance, &lang, &nlu_result.classification);

        let short = self.languages.short(&lang).to_string();
        let config_path = self.paths.skill_config(&domain, &skill, &short);
        nlu_result.config_data_file_path = Some(config_path.clone());

        match self
            .ner
            .extract_entities(&lang, &config_path, &nlu_result)
            .await
        {
            Ok(entities) => {
                nlu_result.current_entities = entities.clone();
                nlu_result.entities = entities;
            }
            Err(err) => match err.severity {
                // recoverable: continue with whatever was extracted
                NerSeverity::Warning => warn!("{err}"),
                NerSeverity::Error => {
                    error!("{err}");
                    let mut vars = HashMap::new();
                    vars.insert("error".to_string(), err.data.clone());
                    let phrase = self.brain.wernicke(&err.code, None, &vars);
                    self.brain.talk(&phrase, true).await;
                }
            },
        }

        if self.route_slot_filling(&intent, &nlu_result).await {
            return Ok(TurnFlow::Done(ProcessOutcome::Consumed));
        }

        let has_filled_slots = {
            let store = self.conversation.lock().await;
            store
                .active_context()
                .map_or(false, |ctx| ctx.slots.iter().any(|slot| slot.is_filled))
        };
        if has_filled_slots {
            return self.handle_slot_filling(utterance).await;
        }

        // ── Normal path ────────────────────────────────
        let context_name = format!("{domain}.{skill}");
        {
            let mut store = self.conversation.lock().await;
            if store
                .active_context()
                .map_or(false, |ctx| ctx.name != context_name)
            {
                store.clean_active_context();
            }
            store.set_active_context(ActiveContext {
                name: context_name,
                lang: lang.clone(),
                intent: intent.clone(),
                domain: domain.clone(),
                action_name: action.clone(),
                original_utterance: utterance.to_string(),
                config_data_file_path: config_path.clone(),
                slots: Vec::new(),
                is_in_action_loop: false,
                next_action: None,
                entities: nlu_result.current_entities.clone(),
                current_entities: nlu_result.current_entities.clone(),
            });
            if let Some(ctx) = store.active_context() {
                nlu_result.current_entities = ctx.current_entities.clone();
                nlu_result.entities = ctx.entities.clone();
            }
        }

        let processed = match self.brain.execute(&nlu_result).await {
            Ok(processed) => processed,
            Err(err) => {
                error!("skill executor failed: {err}");
                self.socket.is_typing(false);
                return Err(NluError::Executor(err));
            }
        };

        // Post-execution bookkeeping: loops the skill opted into, and the
        // rotation to its declared next action.
        {
            let mut store = self.conversation.lock().await;
            if let Some(ctx) = store.active_context_mut() {
                if processed.core.is_in_action_loop == Some(true) {
                    ctx.is_in_action_loop = true;
                }
                let next = processed
                    .next_action
                    .clone()
                    .or_else(|| processed.action.as_ref().and_then(|a| a.next_action.clone()));
                if let Some(next_name) = next {
                    let has_loop = read_json::<SkillConfig>(&config_path)
                        .ok()
                        .and_then(|config| config.actions.get(&next_name).cloned())
                        .map_or(false, |action| action.action_loop.is_some());
                    ctx.intent = format!("{skill}.{next_name}");
                    ctx.action_name = next_name.clone();
                    ctx.is_in_action_loop = has_loop;
                    ctx.next_action = Some(NextAction {
                        name: next_name,
                        has_loop,
                    });
                }
            }
        }

        Ok(TurnFlow::Done(ProcessOutcome::Answered(Box::new(
            CompletedTurn {
                processing_time: 0,
                nlu_processing_time: 0,
                nlu: nlu_result,
                skill: processed,
            },
        ))))
    }
}

/// Derive `{domain, skill, action}` from an intent string, using the
/// classifier's domain knowledge when the intent only carries two segments.
fn resolve_classification(
    main: &dyn IntentClassifier,
    outcome: &ClassificationOutcome,
    intent: &str,
    score: f64,
) -> Option<Classification> {
    match intent_segments(intent).as_slice() {
        [domain, skill, action] => Some(Classification {
            domain: (*domain).to_string(),
            skill: (*skill).to_string(),
            action: (*action).to_string(),
            confidence: score,
        }),
        [skill, action] => {
            let domain = outcome.domain.clone().or_else(|| {
                main.intent_domain(&outcome.locale, intent)
                    .and_then(|owner| owner.split('.').next().map(str::to_string))
            })?;
            Some(Classification {
                domain,
                skill: (*skill).to_string(),
                action: (*action).to_string(),
                confidence: score,
            })
        }
        _ => {
            warn!("unparseable intent: {intent}");
            None
        }
    }
}

/// Stamp latency attribution onto the outcome. Milliseconds, rounded up so
/// a served turn never reports zero.
fn finalize(outcome: ProcessOutcome, started: Instant) -> ProcessOutcome {
    let micros = started.elapsed().as_micros();
    let processing_time = ((micros + 999) / 1000).max(1) as u64;
    match outcome {
        ProcessOutcome::Answered(mut turn) => {
            turn.processing_time = processing_time;
            turn.nlu_processing_time = processing_time.saturating_sub(turn.skill.execution_time);
            ProcessOutcome::Answered(turn)
        }
        ProcessOutcome::NotFound { message, .. } => ProcessOutcome::NotFound {
            processing_time,
            message,
        },
        ProcessOutcome::Consumed => ProcessOutcome::Consumed,
    }
}
