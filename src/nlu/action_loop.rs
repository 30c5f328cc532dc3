//! Action Loop Handler — drives an action that declared itself "in loop"
//! until the expected item stops arriving or the skill bows out.

use std::collections::HashMap;
use tracing::{error, warn};

use super::dispatcher::TurnFlow;
use super::types::{
    Classification, CompletedTurn, NluResult, ProcessOutcome, ResolverMatch,
};
use super::{NluError, NluSession};
use crate::config::{read_json, ExpectedItem, ExpectedItemKind, GlobalResolverFile, SkillConfig};
use crate::conversation::NextAction;
use crate::ner::NerSeverity;
use crate::nlu::types::Entity;

impl NluSession {
    pub(crate) async fn handle_action_loop(&self, utterance: &str) -> Result<TurnFlow, NluError> {
        let snapshot = self.conversation.lock().await.active_context().cloned();
        let Some(ctx) = snapshot else {
            self.socket.is_typing(false);
            return Ok(TurnFlow::Done(ProcessOutcome::Consumed));
        };

        let lang = self.current_lang().await;
        let skill_name = ctx.skill().to_string();

        let mut nlu_result = NluResult {
            utterance: utterance.to_string(),
            slots: ctx.slot_values(),
            entities: ctx.entities.clone(),
            config_data_file_path: Some(ctx.config_data_file_path.clone()),
            classification: Classification::certain(
                ctx.domain.clone(),
                skill_name.clone(),
                ctx.action_name.clone(),
            ),
            ..Default::default()
        };

        let extracted = match self
            .ner
            .extract_entities(&lang, &ctx.config_data_file_path, &nlu_result)
            .await
        {
            Ok(entities) => entities,
            Err(err) => {
                match err.severity {
                    NerSeverity::Warning => warn!("{err}"),
                    NerSeverity::Error => error!("{err}"),
                }
                Vec::new()
            }
        };
        nlu_result.current_entities = extracted.clone();
        nlu_result.entities.extend(extracted.iter().cloned());

        let config: SkillConfig = read_json(&ctx.config_data_file_path)?;
        let expected = config
            .actions
            .get(&ctx.action_name)
            .and_then(|action| action.action_loop.as_ref())
            .map(|l| l.expected_item.clone());
        let Some(expected) = expected else {
            // the action no longer declares a loop; treat like off topic
            warn!("{} is in loop without a loop config", ctx.intent);
            return self.leave_loop_off_topic(utterance).await;
        };

        let matched = self
            .expected_item_arrived(&expected, &extracted, utterance, &lang, &skill_name, &config, &mut nlu_result)
            .await?;
        if !matched {
            return self.leave_loop_off_topic(utterance).await;
        }

        let processed = match self.brain.execute(&nlu_result).await {
            Ok(processed) => processed,
            Err(err) => {
                // the loop aborts silently; the user re-drives it
                error!("action loop executor failed: {err}");
                self.socket.is_typing(false);
                return Ok(TurnFlow::Done(ProcessOutcome::Consumed));
            }
        };

        if processed.core.restart {
            let original = ctx.original_utterance.clone();
            self.conversation.lock().await.clean_active_context();
            return Ok(TurnFlow::Redispatch(original));
        }

        let next_action = processed
            .action
            .as_ref()
            .and_then(|action| action.next_action.clone());
        let leaves_loop = processed.core.is_in_action_loop == Some(false);

        if leaves_loop && next_action.is_none() {
            // loop over, nothing queued up
            self.conversation.lock().await.clean_active_context();
        } else if leaves_loop {
            if let Some(next_name) = next_action {
                let has_loop = config
                    .actions
                    .get(&next_name)
                    .map_or(false, |action| action.action_loop.is_some());
                let mut store = self.conversation.lock().await;
                if let Some(active) = store.active_context_mut() {
                    active.intent = format!("{skill_name}.{next_name}");
                    active.action_name = next_name.clone();
                    active.is_in_action_loop = has_loop;
                    active.next_action = Some(NextAction {
                        name: next_name,
                        has_loop,
                    });
                }
            }
        }
        // otherwise the loop continues with the same context

        Ok(TurnFlow::Done(ProcessOutcome::Answered(Box::new(
            CompletedTurn {
                processing_time: 0,
                nlu_processing_time: 0,
                nlu: nlu_result,
                skill: processed,
            },
        ))))
    }

    /// Did this utterance carry the item the loop is waiting for? Resolver
    /// kinds also write the resolved `{name, value}` pair into the result.
    #[allow(clippy::too_many_arguments)]
    async fn expected_item_arrived(
        &self,
        expected: &ExpectedItem,
        extracted: &[Entity],
        utterance: &str,
        lang: &str,
        skill_name: &str,
        config: &SkillConfig,
        nlu_result: &mut NluResult,
    ) -> Result<bool, NluError> {
        match expected.kind {
            ExpectedItemKind::Entity => {
                Ok(extracted.iter().any(|entity| entity.entity == expected.name))
            }
            ExpectedItemKind::GlobalResolver | ExpectedItemKind::SkillResolver => {
                let model = match expected.kind {
                    ExpectedItemKind::GlobalResolver => self.models.global_resolvers().await,
                    _ => self.models.skills_resolvers().await,
                };
                let Some(model) = model else {
                    return Err(NluError::ModelsNotReady);
                };
                let outcome = self.classify_guarded(&model, utterance).await?;
                let intent = outcome.intent;

                let skill_prefix = format!("resolver.{skill_name}.");
                let is_global = intent.starts_with("resolver.global.");
                if !is_global && !intent.starts_with(&skill_prefix) {
                    return Ok(false);
                }

                let leaf = intent.rsplit('.').next().unwrap_or_default();
                let value = if is_global {
                    let short = self.languages.short(lang).to_string();
                    let file: GlobalResolverFile =
                        read_json(&self.paths.global_resolver(&short, &expected.name))?;
                    file.intents.get(leaf).map(|intent| intent.value.clone())
                } else {
                    config
                        .resolvers
                        .get(&expected.name)
                        .and_then(|resolver| resolver.intents.get(leaf))
                        .map(|intent| intent.value.clone())
                };

                match value {
                    Some(value) => {
                        let matched = ResolverMatch {
                            name: expected.name.clone(),
                            value,
                        };
                        nlu_result.current_resolvers = vec![matched.clone()];
                        nlu_result.resolvers.push(matched);
                        Ok(true)
                    }
                    None => {
                        warn!("no resolver value for intent leaf {leaf}");
                        Ok(false)
                    }
                }
            }
        }
    }

    /// Off-topic exit: announce, drop the context, re-enter dispatch with
    /// the same utterance.
    async fn leave_loop_off_topic(&self, utterance: &str) -> Result<TurnFlow, NluError> {
        let phrase = self
            .brain
            .wernicke("random_context_out_of_topic", None, &HashMap::new());
        self.brain.talk(&phrase, true).await;
        self.conversation.lock().await.clean_active_context();
        Ok(TurnFlow::Redispatch(utterance.to_string()))
    }
}
