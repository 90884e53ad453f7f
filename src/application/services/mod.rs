pub mod analysis_orchestrator;
pub mod completion;
pub mod context_budget;
pub mod prompt_templates;
pub mod short_prompt;
pub mod strategy_planner;
pub mod usage_ledger;

pub use analysis_orchestrator::{AnalysisOrchestrator, AnalysisOutcome, RunSettings};
pub use context_budget::{ContextBudgetCalculator, ModelCatalog};
pub use short_prompt::ShortPromptGenerator;
pub use strategy_planner::StrategyPlanner;
pub use usage_ledger::UsageLedger;
