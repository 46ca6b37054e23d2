//! Parallel example generation over independent regions
//!
//! Each rayon worker takes one [`RegionTask`], opens its own reference
//! handle, renders into in-memory sinks and ships the finished examples to a
//! single writer thread through a bounded crossbeam channel. The writer holds
//! results back until every earlier task has been written, so the output files
//! are byte-identical to a sequential run over the same task list.

use std::collections::BTreeMap;
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use rayon::prelude::*;

use crate::config::MakeExamplesOptions;
use crate::example::Example;
use crate::make_examples::{ExamplesGenerator, RegionStats};
use crate::reference::ReferenceSource;
use crate::sink::{ExampleSink, MemorySink};
use crate::types::{Candidate, GenomicRange, Read};

/// One unit of work: a region with its candidates and reads per sample
#[derive(Debug, Clone)]
pub struct RegionTask {
    pub region: GenomicRange,
    pub candidates: Vec<Candidate>,
    pub reads_per_sample: Vec<Vec<Read>>,
}

/// Examples of one task, one list per configured role
struct TaskOutput {
    index: usize,
    per_role: Vec<Vec<Example>>,
}

fn run_task<R, F>(
    options: &MakeExamplesOptions,
    reference_factory: &F,
    task: &RegionTask,
) -> Result<(Vec<Vec<Example>>, RegionStats)>
where
    R: ReferenceSource,
    F: Fn() -> Result<R>,
{
    let reference = reference_factory()
        .with_context(|| format!("Failed to open reference for {}", task.region))?;
    let memory: Vec<MemorySink> = options.samples.iter().map(|_| MemorySink::new()).collect();
    let sinks: Vec<Box<dyn ExampleSink>> = memory
        .iter()
        .map(|m| Box::new(m.clone()) as Box<dyn ExampleSink>)
        .collect();

    let mut generator = ExamplesGenerator::new(options.clone(), reference, sinks)?;
    let stats = generator
        .write_examples_for_all_roles(&task.candidates, &task.reads_per_sample)
        .with_context(|| format!("Failed to generate examples in {}", task.region))?;
    generator.close()?;

    Ok((memory.iter().map(|m| m.take()).collect(), stats))
}

/// Writer thread: writes task outputs strictly in task order
fn ordered_writer_thread(
    rx: Receiver<TaskOutput>,
    mut sinks: Vec<Box<dyn ExampleSink>>,
    num_tasks: usize,
) -> Result<usize> {
    let mut pending: BTreeMap<usize, Vec<Vec<Example>>> = BTreeMap::new();
    let mut next = 0;
    let mut written = 0;
    let mut peak_pending = 0;

    for output in rx {
        pending.insert(output.index, output.per_role);
        peak_pending = peak_pending.max(pending.len());
        while let Some(per_role) = pending.remove(&next) {
            for (sink, examples) in sinks.iter_mut().zip(per_role) {
                for example in &examples {
                    sink.write(example)?;
                }
                written += examples.len();
            }
            next += 1;
        }
    }

    log::debug!("Writer held at most {} out-of-order task outputs", peak_pending);
    for sink in sinks.iter_mut() {
        sink.close()?;
    }
    if next != num_tasks {
        return Err(anyhow!(
            "Task {} produced no output; {} of {} tasks written",
            next,
            next,
            num_tasks
        ));
    }
    Ok(written)
}

/// Process `tasks` in parallel and write every example to `sinks`
///
/// `sinks[i]` receives the examples of `options.samples[i]`. The first
/// failing task aborts the run; its error is returned after the writer has
/// flushed whatever preceded it.
pub fn write_examples_parallel<R, F>(
    options: &MakeExamplesOptions,
    reference_factory: F,
    tasks: Vec<RegionTask>,
    sinks: Vec<Box<dyn ExampleSink>>,
    channel_buffer: usize,
) -> Result<RegionStats>
where
    R: ReferenceSource,
    F: Fn() -> Result<R> + Sync,
{
    options.validate()?;
    if sinks.len() != options.samples.len() {
        return Err(anyhow!(
            "{} sinks given for {} samples",
            sinks.len(),
            options.samples.len()
        ));
    }

    let t0 = Instant::now();
    let num_tasks = tasks.len();
    log::info!("Processing {} regions in parallel...", num_tasks);

    // Bounded channel limits outputs in flight to the writer. Outputs that
    // arrive ahead of the next index wait in the writer's reorder buffer,
    // which is not bounded: one slow early task can hold back the rest.
    let (tx, rx): (Sender<TaskOutput>, Receiver<TaskOutput>) = bounded(channel_buffer.max(1));
    let writer_handle = thread::spawn(move || ordered_writer_thread(rx, sinks, num_tasks));

    let results: Vec<Result<RegionStats>> = tasks
        .par_iter()
        .enumerate()
        .map(|(index, task)| {
            let (per_role, stats) = run_task(options, &reference_factory, task)?;
            if tx.send(TaskOutput { index, per_role }).is_err() {
                return Err(anyhow!("Writer thread failed"));
            }
            Ok(stats)
        })
        .collect();

    // Close sender to signal writer thread
    drop(tx);

    let writer_result = writer_handle
        .join()
        .map_err(|_| anyhow!("Writer thread panicked"))?;

    let mut total = RegionStats::default();
    for result in results {
        total = total.merge(result?);
    }
    let written = writer_result?;

    log::info!(
        "Parallel run complete: {} regions, {} candidates, {} skipped, {} examples ({}ms)",
        num_tasks,
        total.candidates_processed,
        total.candidates_skipped,
        written,
        t0.elapsed().as_millis()
    );
    Ok(total)
}
