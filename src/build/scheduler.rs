//! Memoized recursive image generation.
//!
//! Every image generates exactly once per run, after everything it references
//! through partitions. Visitation state is tracked per image: a done image is
//! a no-op (this is what makes shared dependencies cheap and correct), and
//! re-entering an in-progress image means the reference graph has a cycle,
//! which fails with the cycle spelled out instead of recursing forever.

use anyhow::{bail, Context, Result};

use crate::build::BuildContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GenState {
    Pending,
    InProgress,
    Done,
}

pub struct Scheduler<'a> {
    ctx: &'a BuildContext,
    states: Vec<GenState>,
    stack: Vec<usize>,
}

impl<'a> Scheduler<'a> {
    pub fn new(ctx: &'a BuildContext) -> Self {
        Scheduler {
            states: vec![GenState::Pending; ctx.catalog().len()],
            stack: Vec::new(),
            ctx,
        }
    }

    /// Generate every catalog image in declaration order, stopping at the
    /// first failure.
    pub fn generate_all(&mut self) -> Result<()> {
        for index in 0..self.ctx.catalog().len() {
            let file = self.ctx.catalog().images()[index].file.clone();
            self.generate(index)
                .with_context(|| format!("failed to generate '{}'", file))?;
        }
        Ok(())
    }

    /// Generate one image, recursing into its dependencies first.
    pub fn generate(&mut self, index: usize) -> Result<()> {
        let ctx = self.ctx;
        let image = &ctx.catalog().images()[index];

        match self.states[index] {
            GenState::Done => return Ok(()),
            GenState::InProgress => {
                let start = self
                    .stack
                    .iter()
                    .position(|&i| i == index)
                    .unwrap_or(0);
                let mut chain: Vec<&str> = self.stack[start..]
                    .iter()
                    .map(|&i| ctx.catalog().images()[i].file.as_str())
                    .collect();
                chain.push(&image.file);
                bail!("circular image reference: {}", chain.join(" -> "));
            }
            GenState::Pending => {}
        }

        self.states[index] = GenState::InProgress;
        self.stack.push(index);

        for partition in &image.partitions {
            let child = ctx.catalog().index_of(&partition.image).ok_or_else(|| {
                anyhow::anyhow!(
                    "image '{}': no rule to generate '{}'",
                    image.file,
                    partition.image
                )
            })?;
            self.generate(child).with_context(|| {
                format!(
                    "generating dependency '{}' of image '{}'",
                    partition.image, image.file
                )
            })?;
        }

        println!(
            "[build] generating '{}' ({})",
            image.file,
            image.handler.kind()
        );
        image.handler.generate(ctx, image).with_context(|| {
            format!(
                "handler '{}' failed for image '{}'",
                image.handler.kind(),
                image.file
            )
        })?;

        self.stack.pop();
        self.states[index] = GenState::Done;
        Ok(())
    }

    pub fn is_done(&self, file: &str) -> bool {
        self.ctx
            .catalog()
            .index_of(file)
            .map(|index| self.states[index] == GenState::Done)
            .unwrap_or(false)
    }
}
