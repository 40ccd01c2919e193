//! Module-level driver.
//!
//! Functions are independent: each gets its own region hierarchy, identity
//! and alias analyses, and dataflow. The only shared inputs are the module
//! itself and the configuration, both read-only, so definitions can be
//! analyzed on a rayon pool.

use rayon::prelude::*;

use kiln_ir::{ArcFunction, ArcModule, Name};

use crate::alias::{BasicAliasAnalysis, RcIdentityFunctionInfo};
use crate::config::ArcOptConfig;
use crate::context::ArcContext;
use crate::dataflow::{DecToIncStateMap, IncToDecStateMap, LoopArcSequenceDataflow, MatchingSet};
use crate::epilogue::ConsumedArgToEpilogueReleaseMatcher;
use crate::region::{LoopRegionFunctionInfo, RegionError};

/// Everything the ARC sequence analysis learned about one function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionArcResults {
    pub name: Name,
    pub dec_to_inc: DecToIncStateMap,
    pub inc_to_dec: IncToDecStateMap,
    pub matching_sets: Vec<MatchingSet>,
    pub epilogue: ConsumedArgToEpilogueReleaseMatcher,
    pub found_nested_retain: bool,
    pub found_nested_release: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("cannot build regions for function #{index} ({name:?}): {source}")]
    Region {
        index: usize,
        name: Name,
        source: RegionError,
    },
    #[error("failed to build ARC worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Analyze one function definition.
pub fn analyze_function(
    func: &ArcFunction,
    config: &ArcOptConfig,
) -> Result<FunctionArcResults, RegionError> {
    let regions = LoopRegionFunctionInfo::build(func)?;
    let identity = RcIdentityFunctionInfo::new(func);
    let alias = BasicAliasAnalysis::new(func, &identity);
    let ctx = ArcContext::new(func, &regions, &identity, &alias)
        .with_allow_leaks(config.allow_leaks);

    let mut dataflow = LoopArcSequenceDataflow::new(ctx);
    dataflow.run();

    let epilogue = ConsumedArgToEpilogueReleaseMatcher::new(&dataflow, config.matcher_mode);
    let matching_sets = dataflow.matching_sets();
    let found_nested_retain = dataflow.found_nested_retain();
    let found_nested_release = dataflow.found_nested_release();
    let (dec_to_inc, inc_to_dec) = dataflow.into_maps();

    tracing::debug!(
        function = ?func.name,
        pairs = matching_sets.len(),
        "analyzed function"
    );
    Ok(FunctionArcResults {
        name: func.name,
        dec_to_inc,
        inc_to_dec,
        matching_sets,
        epilogue,
        found_nested_retain,
        found_nested_release,
    })
}

/// Analyze every definition of `module`, returning results in module order.
///
/// `config.jobs` selects the execution strategy: `1` runs on the calling
/// thread, `0` uses rayon's global pool, anything else builds a dedicated
/// pool of that size.
pub fn analyze_module(
    module: &ArcModule,
    config: &ArcOptConfig,
) -> Result<Vec<FunctionArcResults>, PipelineError> {
    let definitions: Vec<(usize, &ArcFunction)> = module
        .functions
        .iter()
        .enumerate()
        .filter(|(_, func)| func.is_definition())
        .collect();

    let analyze = |&(index, func): &(usize, &ArcFunction)| {
        analyze_function(func, config).map_err(|source| PipelineError::Region {
            index,
            name: func.name,
            source,
        })
    };

    tracing::debug!(
        functions = definitions.len(),
        jobs = config.effective_jobs(),
        "analyzing module"
    );
    let results: Vec<Result<FunctionArcResults, PipelineError>> = match config.jobs {
        1 => definitions.iter().map(analyze).collect(),
        0 => definitions.par_iter().map(analyze).collect(),
        jobs => {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;
            pool.install(|| definitions.par_iter().map(analyze).collect())
        }
    };
    results.into_iter().collect()
}
