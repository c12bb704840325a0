//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use primordia_core::{
    CodeLabel, Genome, Hardware, HardwareFactory, InertHardware, InjectGenotypeId, OrganismId,
    Population, PopulationConfig,
};

/// Builds a seeded world backed by inert hardware.
pub fn world(config: PopulationConfig) -> Population {
    Population::new(config, InertHardware::factory()).expect("world builds")
}

pub fn seeded(mut config: PopulationConfig, seed: u64) -> PopulationConfig {
    config.rng_seed = Some(seed);
    config
}

/// Hardware that copies its genome and divides every `steps_per_divide`
/// executed steps.
pub struct CloneHardware {
    memory: Genome,
    steps_per_divide: u64,
    counter: u64,
}

impl Hardware for CloneHardware {
    fn single_process(&mut self, population: &mut Population, me: OrganismId) {
        if let Some(organism) = population.organism_mut(me) {
            organism.phenotype_mut().bump_time_used();
        }
        self.counter += 1;
        if self.counter >= self.steps_per_divide {
            self.counter = 0;
            population.activate_offspring(self.memory.clone(), me);
        }
    }

    fn memory(&self) -> &Genome {
        &self.memory
    }

    fn code_label(&self) -> CodeLabel {
        CodeLabel::default()
    }

    fn num_threads(&self) -> usize {
        1
    }

    fn thread_owner(&self) -> Option<InjectGenotypeId> {
        None
    }

    fn set_thread_owner(&mut self, _owner: InjectGenotypeId) {}

    fn inject_host(&mut self, _label: &CodeLabel, _code: &Genome) -> bool {
        false
    }
}

/// Factory for [`CloneHardware`].
pub struct CloneHardwareFactory {
    pub steps_per_divide: u64,
}

impl HardwareFactory for CloneHardwareFactory {
    fn build(&self, genome: &Genome) -> Box<dyn Hardware> {
        Box::new(CloneHardware {
            memory: genome.clone(),
            steps_per_divide: self.steps_per_divide,
            counter: 0,
        })
    }
}

/// Hardware that accepts parasite injections up to a thread cap.
pub struct HostHardware {
    memory: Genome,
    threads: Vec<Option<InjectGenotypeId>>,
}

impl HostHardware {
    pub fn factory() -> Box<dyn HardwareFactory> {
        struct Factory;
        impl HardwareFactory for Factory {
            fn build(&self, genome: &Genome) -> Box<dyn Hardware> {
                Box::new(HostHardware {
                    memory: genome.clone(),
                    threads: vec![None],
                })
            }
        }
        Box::new(Factory)
    }
}

impl Hardware for HostHardware {
    fn single_process(&mut self, _population: &mut Population, _me: OrganismId) {}

    fn memory(&self) -> &Genome {
        &self.memory
    }

    fn code_label(&self) -> CodeLabel {
        CodeLabel(vec![0])
    }

    fn num_threads(&self) -> usize {
        self.threads.len()
    }

    fn thread_owner(&self) -> Option<InjectGenotypeId> {
        self.threads.last().copied().flatten()
    }

    fn set_thread_owner(&mut self, owner: InjectGenotypeId) {
        if let Some(last) = self.threads.last_mut() {
            *last = Some(owner);
        }
    }

    fn inject_host(&mut self, _label: &CodeLabel, code: &Genome) -> bool {
        if code.is_empty() {
            return false;
        }
        self.threads.push(None);
        true
    }
}

pub fn genome(text: &str) -> Genome {
    Genome::from_text(text)
}
