//! End-to-end scenario tests for the dispatch pipeline.
//!
//! Every heavy collaborator is mocked: classifiers are queues of canned
//! outcomes, the Brain records executions, the socket records events, the
//! tokenizer client answers from memory. What is under test is the
//! orchestration: routing, context lifecycle, slot filling, action loops,
//! fallbacks, re-picks, and the language switch.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::types::{Classification, Entity, NluResult, ProcessOutcome, ResolverMatch};
use super::{NluError, NluSession};
use crate::brain::{Brain, BrainError, CoreDirectives, SkillResult, SocketEmitter};
use crate::classifier::{
    ClassificationOutcome, ClassifierError, ClassifierLoader, IntentClassifier, IntentScore,
    MandatorySlot, ModelError, ModelKind,
};
use crate::config::{ActionConfig, LanguageInventory, NluPaths};
use crate::conversation::{ActiveContext, NextAction};
use crate::ner::NerError;
use crate::tokenizer::{TokenizerClient, TokenizerError};

// ── Mock classifier ────────────────────────────────────

#[derive(Default)]
struct MockClassifier {
    outcomes: Mutex<VecDeque<ClassificationOutcome>>,
    classify_calls: Mutex<Vec<String>>,
    mandatory: Mutex<HashMap<String, Vec<MandatorySlot>>>,
    entities: Mutex<HashMap<String, Vec<Entity>>>,
    domains: Mutex<HashMap<String, String>>,
    synonyms: Mutex<Vec<(String, String, String)>>,
}

impl MockClassifier {
    fn push_outcome(&self, outcome: ClassificationOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    fn answer_entities(&self, utterance: &str, entities: Vec<Entity>) {
        self.entities
            .lock()
            .unwrap()
            .insert(utterance.to_string(), entities);
    }

    fn declare_domain(&self, intent: &str, owner: &str) {
        self.domains
            .lock()
            .unwrap()
            .insert(intent.to_string(), owner.to_string());
    }

    fn declare_mandatory(&self, intent: &str, slots: Vec<MandatorySlot>) {
        self.mandatory
            .lock()
            .unwrap()
            .insert(intent.to_string(), slots);
    }
}

#[async_trait]
impl IntentClassifier for MockClassifier {
    async fn classify(&self, utterance: &str) -> Result<ClassificationOutcome, ClassifierError> {
        self.classify_calls.lock().unwrap().push(utterance.to_string());
        Ok(self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| outcome("None", 0.0, "en-US")))
    }

    fn register_synonym(&self, lang: &str, entity: &str, value: &str, _surface: Vec<String>) {
        let key = (lang.to_string(), entity.to_string(), value.to_string());
        let mut synonyms = self.synonyms.lock().unwrap();
        // append-only and idempotent per (entity, value)
        if !synonyms.contains(&key) {
            synonyms.push(key);
        }
    }

    fn set_spell_check(&self, _enabled: bool) {}

    fn activate_builtin_entities(&self, _entities: &[&'static str]) {}

    fn intent_domain(&self, _locale: &str, intent: &str) -> Option<String> {
        self.domains.lock().unwrap().get(intent).cloned()
    }

    fn mandatory_slots(&self, intent: &str) -> Vec<MandatorySlot> {
        self.mandatory
            .lock()
            .unwrap()
            .get(intent)
            .cloned()
            .unwrap_or_default()
    }

    async fn extract_entities(
        &self,
        _lang: &str,
        utterance: &str,
        _config_path: &Path,
    ) -> Result<Vec<Entity>, NerError> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .get(utterance)
            .cloned()
            .unwrap_or_default())
    }
}

fn outcome(intent: &str, score: f64, locale: &str) -> ClassificationOutcome {
    ClassificationOutcome {
        locale: locale.to_string(),
        intent: intent.to_string(),
        score,
        domain: None,
        classifications: vec![IntentScore {
            intent: intent.to_string(),
            score,
        }],
        answers: Vec::new(),
    }
}

// ── Mock loader ────────────────────────────────────────

struct StubLoader {
    main: Arc<MockClassifier>,
    global: Arc<MockClassifier>,
    skills: Arc<MockClassifier>,
}

#[async_trait]
impl ClassifierLoader for StubLoader {
    async fn load(
        &self,
        kind: ModelKind,
        _path: &Path,
    ) -> Result<Arc<dyn IntentClassifier>, ModelError> {
        Ok(match kind {
            ModelKind::Main => self.main.clone(),
            ModelKind::GlobalResolvers => self.global.clone(),
            ModelKind::SkillsResolvers => self.skills.clone(),
        })
    }
}

// ── Mock brain / socket / tokenizer ────────────────────

#[derive(Default)]
struct MockBrain {
    executions: Mutex<Vec<NluResult>>,
    talks: Mutex<Vec<(String, bool)>>,
    results: Mutex<VecDeque<Result<SkillResult, BrainError>>>,
}

impl MockBrain {
    fn push_result(&self, result: Result<SkillResult, BrainError>) {
        self.results.lock().unwrap().push_back(result);
    }

    fn spoke(&self, phrase: &str) -> bool {
        self.talks.lock().unwrap().iter().any(|(p, _)| p == phrase)
    }
}

#[async_trait]
impl Brain for MockBrain {
    async fn execute(&self, nlu: &NluResult) -> Result<SkillResult, BrainError> {
        self.executions.lock().unwrap().push(nlu.clone());
        self.results.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(SkillResult {
                execution_time: 3,
                ..Default::default()
            })
        })
    }

    async fn talk(&self, phrase: &str, preserve_typing: bool) {
        self.talks
            .lock()
            .unwrap()
            .push((phrase.to_string(), preserve_typing));
    }

    fn wernicke(&self, key: &str, subkey: Option<&str>, _vars: &HashMap<String, String>) -> String {
        match subkey {
            Some(subkey) => format!("{key}.{subkey}"),
            None => key.to_string(),
        }
    }
}

#[derive(Default)]
struct MockSocket {
    typing: Mutex<Vec<bool>>,
    suggestions: Mutex<Vec<Vec<String>>>,
}

impl SocketEmitter for MockSocket {
    fn is_typing(&self, on: bool) {
        self.typing.lock().unwrap().push(on);
    }

    fn suggest(&self, suggestions: &[String]) {
        self.suggestions.lock().unwrap().push(suggestions.to_vec());
    }
}

#[derive(Default)]
struct MockTokenizer {
    spacy: Mutex<Vec<Entity>>,
}

#[async_trait]
impl TokenizerClient for MockTokenizer {
    async fn connect(&self) -> Result<(), TokenizerError> {
        Ok(())
    }

    async fn spacy_entities(&self, _utterance: &str) -> Result<Vec<Entity>, TokenizerError> {
        Ok(self.spacy.lock().unwrap().clone())
    }
}

// ── Harness ────────────────────────────────────────────

struct Harness {
    session: NluSession,
    main: Arc<MockClassifier>,
    global: Arc<MockClassifier>,
    brain: Arc<MockBrain>,
    socket: Arc<MockSocket>,
    tokenizer: Arc<MockTokenizer>,
    _dir: tempfile::TempDir,
}

impl Harness {
    async fn answered(&self, utterance: &str) -> super::types::CompletedTurn {
        match self.session.process(utterance).await.unwrap() {
            ProcessOutcome::Answered(turn) => *turn,
            other => panic!("expected an answered turn, got {other:?}"),
        }
    }

    async fn has_context(&self) -> bool {
        self.session.conversation.lock().await.has_active_context()
    }

    fn write_skill_config(&self, domain: &str, skill: &str, config: serde_json::Value) {
        let path = self.session.paths.skill_config(domain, skill, "en");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, config.to_string()).unwrap();
    }

    fn write_global_resolver(&self, name: &str, config: serde_json::Value) {
        let path = self.session.paths.global_resolver("en", name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, config.to_string()).unwrap();
    }

    async fn seed_context(&self, ctx: ActiveContext) {
        self.session.conversation.lock().await.set_active_context(ctx);
    }
}

async fn build_harness(fallbacks: serde_json::Value, load: bool) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let dir = tempfile::tempdir().unwrap();
    for kind in [
        ModelKind::GlobalResolvers,
        ModelKind::SkillsResolvers,
        ModelKind::Main,
    ] {
        std::fs::write(dir.path().join(kind.file_name()), b"{}").unwrap();
    }
    let langs = json!({
        "en-US": { "short": "en", "fallbacks": fallbacks },
        "fr-FR": { "short": "fr", "fallbacks": [] }
    });
    std::fs::write(dir.path().join("langs.json"), langs.to_string()).unwrap();

    let paths = NluPaths {
        models_dir: dir.path().to_path_buf(),
        data_dir: dir.path().to_path_buf(),
        skills_dir: dir.path().join("skills"),
        tokenizer_binary: "true".into(),
    };
    let languages = LanguageInventory::load(&paths.langs_file()).unwrap();

    let main = Arc::new(MockClassifier::default());
    let global = Arc::new(MockClassifier::default());
    let skills = Arc::new(MockClassifier::default());
    let brain = Arc::new(MockBrain::default());
    let socket = Arc::new(MockSocket::default());
    let tokenizer = Arc::new(MockTokenizer::default());

    let session = NluSession::new(
        paths,
        languages,
        "en-US",
        Arc::new(StubLoader {
            main: main.clone(),
            global: global.clone(),
            skills: skills.clone(),
        }),
        tokenizer.clone(),
        brain.clone(),
        socket.clone(),
    );
    if load {
        session.load_models().await.unwrap();
    }

    Harness {
        session,
        main,
        global,
        brain,
        socket,
        tokenizer,
        _dir: dir,
    }
}

async fn harness() -> Harness {
    build_harness(json!([]), true).await
}

fn plain_context(name: &str, domain: &str, action: &str, config_path: std::path::PathBuf) -> ActiveContext {
    let skill = name.strip_prefix(&format!("{domain}.")).unwrap();
    ActiveContext {
        name: name.to_string(),
        lang: "en-US".into(),
        intent: format!("{skill}.{action}"),
        domain: domain.to_string(),
        action_name: action.to_string(),
        original_utterance: "let's start".into(),
        config_data_file_path: config_path,
        slots: Vec::new(),
        is_in_action_loop: false,
        next_action: None,
        entities: Vec::new(),
        current_entities: Vec::new(),
    }
}

// ── Rejection & locale handling ────────────────────────

#[tokio::test]
async fn rejects_until_models_are_ready() {
    let h = build_harness(json!([]), false).await;
    let err = h.session.process("hello").await.unwrap_err();
    assert!(matches!(err, NluError::ModelsNotReady));
    assert!(h.brain.spoke("random_errors"));
}

#[tokio::test]
async fn unsupported_locale_consumes_the_turn() {
    let h = harness().await;
    h.main.push_outcome(outcome("greetings.hello", 0.9, "xx-XX"));

    let out = h.session.process("hola").await.unwrap();
    assert!(matches!(out, ProcessOutcome::Consumed));
    assert!(h.brain.spoke("random_language_not_supported"));
    assert_eq!(h.socket.typing.lock().unwrap().last(), Some(&false));
}

// ── Unknown intents & fallbacks ────────────────────────

#[tokio::test]
async fn cold_start_unknown_intent_reports_not_found() {
    let h = harness().await;
    h.main.push_outcome(outcome("None", 0.0, "en-US"));

    match h.session.process("asdfghjkl").await.unwrap() {
        ProcessOutcome::NotFound {
            processing_time,
            message,
        } => {
            assert_eq!(message, "Intent not found");
            assert!(processing_time >= 1);
        }
        other => panic!("expected not-found, got {other:?}"),
    }
    assert!(h.brain.spoke("random_unknown_intents"));
    assert_eq!(h.socket.typing.lock().unwrap().last(), Some(&false));
    assert!(h.brain.executions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn fallback_match_runs_the_skill_with_full_confidence() {
    let fallbacks = json!([{
        "words": ["hello", "leon"],
        "domain": "greetings",
        "skill": "hello",
        "action": "run"
    }]);
    let h = build_harness(fallbacks, true).await;
    h.main.push_outcome(outcome("None", 0.0, "en-US"));

    let turn = h.answered("well hello leon!").await;
    assert_eq!(
        turn.nlu.classification,
        Classification::certain("greetings", "hello", "run")
    );
    assert!(turn.nlu.entities.is_empty());
    assert_eq!(h.brain.executions.lock().unwrap().len(), 1);
}

// ── Slot filling ───────────────────────────────────────

#[tokio::test]
async fn slot_filling_asks_then_fills_then_executes() {
    let h = harness().await;
    let mut first = outcome("shopping.add_item", 0.9, "en-US");
    first.domain = Some("productivity".into());
    h.main.push_outcome(first);
    h.main.declare_mandatory(
        "shopping.add_item",
        vec![MandatorySlot {
            name: "item".into(),
            expected_entity: "product".into(),
            picked_question: "Which item should I add?".into(),
            suggestions: vec!["milk".into(), "bread".into()],
        }],
    );

    // turn 1: no product entity, the question is asked, the turn resolves empty
    let out = h.session.process("add to my shopping list").await.unwrap();
    assert!(matches!(out, ProcessOutcome::Consumed));
    assert!(h.brain.spoke("Which item should I add?"));
    assert_eq!(
        h.socket.suggestions.lock().unwrap().first(),
        Some(&vec!["milk".to_string(), "bread".to_string()])
    );
    assert!(h.brain.executions.lock().unwrap().is_empty());
    assert!(h.has_context().await);

    // turn 2: the answer carries the expected entity
    h.main
        .answer_entities("milk", vec![Entity::resolved("product", "milk")]);
    let turn = h.answered("milk").await;

    assert_eq!(turn.nlu.utterance, "add to my shopping list");
    assert_eq!(turn.nlu.classification.action, "add_item");
    assert_eq!(turn.nlu.classification.confidence, 1.0);
    assert!(turn.nlu.slots["item"].is_filled);
    assert_eq!(turn.nlu.slots["item"].value, json!("milk"));
    assert_eq!(h.brain.executions.lock().unwrap().len(), 1);
    assert!(!h.has_context().await, "context is discharged on completion");
}

#[tokio::test]
async fn off_topic_during_slot_filling_drops_the_context() {
    let h = harness().await;
    let mut first = outcome("shopping.add_item", 0.9, "en-US");
    first.domain = Some("productivity".into());
    h.main.push_outcome(first);
    h.main.declare_mandatory(
        "shopping.add_item",
        vec![MandatorySlot {
            name: "item".into(),
            expected_entity: "product".into(),
            picked_question: "Which item should I add?".into(),
            suggestions: Vec::new(),
        }],
    );

    let out = h.session.process("add to my shopping list").await.unwrap();
    assert!(matches!(out, ProcessOutcome::Consumed));

    // no product entity in the reply
    let out = h.session.process("what's the weather").await.unwrap();
    assert!(matches!(out, ProcessOutcome::Consumed));
    assert!(h.brain.spoke("random_context_out_of_topic"));
    assert!(!h.has_context().await);
    assert!(h.brain.executions.lock().unwrap().is_empty());
}

// ── Action loop ────────────────────────────────────────

fn loop_config() -> serde_json::Value {
    json!({
        "actions": {
            "guess": {
                "loop": { "expected_item": { "name": "answer", "type": "global_resolver" } }
            }
        }
    })
}

#[tokio::test]
async fn action_loop_resolves_denial_and_ends() {
    let h = harness().await;
    h.write_skill_config("games", "akinator", loop_config());
    h.write_global_resolver(
        "answer",
        json!({ "intents": {
            "affirmation": { "value": "affirmation" },
            "denial": { "value": "denial" }
        }}),
    );
    let config_path = h.session.paths.skill_config("games", "akinator", "en");
    let mut ctx = plain_context("games.akinator", "games", "guess", config_path);
    ctx.is_in_action_loop = true;
    h.seed_context(ctx).await;

    h.global
        .push_outcome(outcome("resolver.global.denial", 0.97, "en-US"));
    h.brain.push_result(Ok(SkillResult {
        execution_time: 2,
        action: Some(ActionConfig::default()),
        core: CoreDirectives {
            restart: false,
            is_in_action_loop: Some(false),
        },
        ..Default::default()
    }));

    let turn = h.answered("no thanks").await;
    assert_eq!(
        turn.nlu.resolvers,
        vec![ResolverMatch {
            name: "answer".into(),
            value: "denial".into()
        }]
    );
    assert_eq!(turn.nlu.classification.confidence, 1.0);
    assert_eq!(h.brain.executions.lock().unwrap().len(), 1);
    assert!(!h.has_context().await, "loop end discharges the context");
}

#[tokio::test]
async fn action_loop_off_topic_redispatches_the_utterance() {
    let h = harness().await;
    h.write_skill_config(
        "games",
        "akinator",
        json!({ "actions": { "guess": {
            "loop": { "expected_item": { "name": "city", "type": "entity" } }
        }}}),
    );
    let config_path = h.session.paths.skill_config("games", "akinator", "en");
    let mut ctx = plain_context("games.akinator", "games", "guess", config_path);
    ctx.is_in_action_loop = true;
    h.seed_context(ctx).await;

    // no city entity, and the re-dispatched classification finds nothing
    match h.session.process("tell me a joke").await.unwrap() {
        ProcessOutcome::NotFound { message, .. } => assert_eq!(message, "Intent not found"),
        other => panic!("expected not-found after redispatch, got {other:?}"),
    }
    assert!(h.brain.spoke("random_context_out_of_topic"));
    assert!(h.brain.spoke("random_unknown_intents"));
    assert!(!h.has_context().await);
}

#[tokio::test]
async fn action_loop_stays_active_while_the_skill_keeps_it() {
    let h = harness().await;
    h.write_skill_config(
        "games",
        "akinator",
        json!({ "actions": { "guess": {
            "loop": { "expected_item": { "name": "city", "type": "entity" } }
        }}}),
    );
    let config_path = h.session.paths.skill_config("games", "akinator", "en");
    let mut ctx = plain_context("games.akinator", "games", "guess", config_path);
    ctx.is_in_action_loop = true;
    h.seed_context(ctx).await;

    h.main
        .answer_entities("paris", vec![Entity::resolved("city", "paris")]);
    h.brain.push_result(Ok(SkillResult {
        execution_time: 2,
        core: CoreDirectives {
            restart: false,
            is_in_action_loop: Some(true),
        },
        ..Default::default()
    }));

    let turn = h.answered("paris").await;
    assert_eq!(turn.nlu.current_entities[0].entity, "city");
    assert!(h.has_context().await);
    let store = h.session.conversation.lock().await;
    assert!(store.active_context().unwrap().is_in_action_loop);
}

#[tokio::test]
async fn action_loop_restart_redispatches_the_original_utterance() {
    let h = harness().await;
    h.write_skill_config(
        "games",
        "akinator",
        json!({ "actions": { "guess": {
            "loop": { "expected_item": { "name": "city", "type": "entity" } }
        }}}),
    );
    let config_path = h.session.paths.skill_config("games", "akinator", "en");
    let mut ctx = plain_context("games.akinator", "games", "guess", config_path);
    ctx.is_in_action_loop = true;
    ctx.original_utterance = "play akinator".into();
    h.seed_context(ctx).await;

    h.main
        .answer_entities("paris", vec![Entity::resolved("city", "paris")]);
    h.brain.push_result(Ok(SkillResult {
        execution_time: 2,
        core: CoreDirectives {
            restart: true,
            is_in_action_loop: None,
        },
        ..Default::default()
    }));
    // the restarted cycle classifies the original utterance
    let mut fresh = outcome("akinator.start", 0.9, "en-US");
    fresh.domain = Some("games".into());
    h.main.push_outcome(fresh);

    let turn = h.answered("paris").await;
    assert_eq!(turn.nlu.utterance, "play akinator");
    assert_eq!(turn.nlu.classification.action, "start");
    let calls = h.main.classify_calls.lock().unwrap();
    assert_eq!(*calls, ["play akinator"]);
}

// ── Context-biased re-pick ─────────────────────────────

#[tokio::test]
async fn repick_prefers_the_active_context_above_threshold() {
    let h = harness().await;
    let config_path = h.session.paths.skill_config("shopping", "list", "en");
    h.seed_context(plain_context("shopping.list", "shopping", "create", config_path))
        .await;

    let mut picked = outcome("todo.list.delete", 0.72, "en-US");
    picked.classifications = vec![
        IntentScore {
            intent: "todo.list.delete".into(),
            score: 0.72,
        },
        IntentScore {
            intent: "shopping.list.delete".into(),
            score: 0.68,
        },
    ];
    h.main.push_outcome(picked);
    h.main.declare_domain("todo.list.delete", "todo.list");
    h.main.declare_domain("shopping.list.delete", "shopping.list");

    let turn = h.answered("remove the list").await;
    assert_eq!(
        turn.nlu.classification,
        Classification {
            domain: "shopping".into(),
            skill: "list".into(),
            action: "delete".into(),
            confidence: 0.68,
        }
    );
    let store = h.session.conversation.lock().await;
    assert_eq!(store.active_context().unwrap().name, "shopping.list");
}

#[tokio::test]
async fn repick_keeps_the_top_classification_below_threshold() {
    let h = harness().await;
    let config_path = h.session.paths.skill_config("shopping", "list", "en");
    h.seed_context(plain_context("shopping.list", "shopping", "create", config_path))
        .await;

    let mut picked = outcome("todo.list.delete", 0.72, "en-US");
    picked.classifications = vec![
        IntentScore {
            intent: "todo.list.delete".into(),
            score: 0.72,
        },
        IntentScore {
            intent: "shopping.list.delete".into(),
            score: 0.41,
        },
    ];
    h.main.push_outcome(picked);
    h.main.declare_domain("todo.list.delete", "todo.list");
    h.main.declare_domain("shopping.list.delete", "shopping.list");

    let turn = h.answered("remove the list").await;
    assert_eq!(turn.nlu.classification.domain, "todo");
    assert_eq!(turn.nlu.classification.confidence, 0.72);
}

// ── Normal path bookkeeping ────────────────────────────

#[tokio::test]
async fn successful_turn_binds_the_context_to_the_classification() {
    let h = harness().await;
    let mut picked = outcome("hello.run", 0.9, "en-US");
    picked.domain = Some("greetings".into());
    h.main.push_outcome(picked);

    let turn = h.answered("hello there").await;
    assert!(turn.processing_time >= 1);
    assert!(turn.nlu_processing_time <= turn.processing_time);

    let store = h.session.conversation.lock().await;
    let ctx = store.active_context().unwrap();
    assert_eq!(ctx.name, turn.nlu.classification.context_name());
    assert_eq!(ctx.original_utterance, "hello there");
}

#[tokio::test]
async fn next_action_rotates_the_context() {
    let h = harness().await;
    h.write_skill_config(
        "games",
        "akinator",
        json!({ "actions": {
            "start": { "next_action": "guess" },
            "guess": { "loop": { "expected_item": { "name": "answer", "type": "global_resolver" } } }
        }}),
    );
    let mut picked = outcome("akinator.start", 0.9, "en-US");
    picked.domain = Some("games".into());
    h.main.push_outcome(picked);
    h.brain.push_result(Ok(SkillResult {
        execution_time: 2,
        next_action: Some("guess".into()),
        ..Default::default()
    }));

    let _ = h.answered("play akinator").await;

    let store = h.session.conversation.lock().await;
    let ctx = store.active_context().unwrap();
    assert_eq!(ctx.action_name, "guess");
    assert_eq!(ctx.intent, "akinator.guess");
    assert!(ctx.is_in_action_loop, "the rotated action declares a loop");
    assert_eq!(
        ctx.next_action,
        Some(NextAction {
            name: "guess".into(),
            has_loop: true
        })
    );
}

#[tokio::test]
async fn executor_error_is_rejected_and_clears_typing() {
    let h = harness().await;
    let mut picked = outcome("hello.run", 0.9, "en-US");
    picked.domain = Some("greetings".into());
    h.main.push_outcome(picked);
    h.brain
        .push_result(Err(BrainError("skill crashed".into())));

    let err = h.session.process("hello there").await.unwrap_err();
    assert!(matches!(err, NluError::Executor(_)));
    assert_eq!(h.socket.typing.lock().unwrap().last(), Some(&false));
}

// ── Language switch ────────────────────────────────────

#[tokio::test]
async fn language_switch_recycles_and_reenters_once() {
    let h = harness().await;
    // detected locale differs from the session language
    h.main.push_outcome(outcome("hello.run", 0.9, "fr-FR"));
    // the re-entered turn finds nothing, which is fine for this test
    h.main.push_outcome(outcome("None", 0.0, "fr-FR"));

    let out = h.session.process("bonjour leon").await.unwrap();
    assert!(matches!(out, ProcessOutcome::Consumed));
    assert!(h
        .brain
        .talks
        .lock()
        .unwrap()
        .contains(&("random_language_switch".to_string(), true)));

    // the reconnect task fires asynchronously
    tokio::time::sleep(std::time::Duration::from_millis(400)).await;

    assert_eq!(h.session.current_lang().await, "fr-FR");
    let calls = h.main.classify_calls.lock().unwrap();
    assert_eq!(
        *calls,
        ["bonjour leon", "bonjour leon"],
        "exactly one re-entry with the original utterance"
    );
    assert!(!h.has_context().await, "switching language clears the context");
}

// ── spaCy merge ────────────────────────────────────────

#[tokio::test]
async fn spacy_merge_is_idempotent() {
    let h = harness().await;
    *h.tokenizer.spacy.lock().unwrap() = vec![Entity::resolved("PERSON", "emmanuel macron")];

    h.session
        .ner
        .merge_spacy_entities("en-US", "who is emmanuel macron")
        .await
        .unwrap();
    let after_first = h.main.synonyms.lock().unwrap().clone();

    h.session
        .ner
        .merge_spacy_entities("en-US", "who is emmanuel macron")
        .await
        .unwrap();
    let after_second = h.main.synonyms.lock().unwrap().clone();

    assert_eq!(after_first, after_second);
    assert_eq!(
        after_first,
        vec![(
            "en-US".to_string(),
            "PERSON".to_string(),
            "emmanuel macron".to_string()
        )]
    );
}
