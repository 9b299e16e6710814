//! Compute fabric collaborator.
//!
//! The dataflow grid itself is outside this crate. The engine only needs
//! something that consumes staged input-port instances and produces
//! output-port instances, so the fabric is a trait with two trivial
//! implementations for tests and demos.
//!
//! # Configuration words
//!
//! `configure(addr, size)` loads `size` 64-bit words. Each nonzero word
//! maps one port onto fabric lanes:
//!
//! ```text
//! bits  0..8   port id
//! bit   8      direction (0 = input, 1 = output)
//! bits 16..24  lane count
//! ```

use crate::device::port::{pack_words, PortDirection, PortInterface};

/// Port to lane mapping loaded by a configuration stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FabricConfig {
    /// (input port, lanes)
    pub inputs: Vec<(usize, usize)>,
    /// (output port, lanes)
    pub outputs: Vec<(usize, usize)>,
}

impl FabricConfig {
    /// Decode configuration bytes as loaded from memory.
    pub fn decode(bytes: &[u8]) -> Self {
        let mut config = Self::default();
        for word in pack_words(bytes).into_iter().filter(|&w| w != 0) {
            let port = (word & 0xFF) as usize;
            let lanes = ((word >> 16) & 0xFF) as usize;
            if word & (1 << 8) == 0 {
                config.inputs.push((port, lanes));
            } else {
                config.outputs.push((port, lanes));
            }
        }
        config
    }

    /// Encode into configuration words.
    pub fn encode(&self) -> Vec<u64> {
        let word = |port: usize, lanes: usize, dir: u64| {
            (port as u64 & 0xFF) | (dir << 8) | ((lanes as u64 & 0xFF) << 16)
        };
        self.inputs
            .iter()
            .map(|&(p, l)| word(p, l, 0))
            .chain(self.outputs.iter().map(|&(p, l)| word(p, l, 1)))
            .collect()
    }

    /// Lane count configured for a port, if mapped.
    pub fn lanes(&self, direction: PortDirection, port: usize) -> Option<usize> {
        let table = match direction {
            PortDirection::Input => &self.inputs,
            PortDirection::Output => &self.outputs,
        };
        table.iter().find(|&&(p, _)| p == port).map(|&(_, l)| l)
    }
}

/// Dataflow grid consuming and producing port instances.
pub trait ComputeFabric: std::fmt::Debug {
    /// Apply a new configuration. Called after the ports have been reset.
    fn configure(&mut self, config: &FabricConfig);

    /// Fire whatever is ready this cycle. Returns the instances fired.
    fn fire(&mut self, inputs: &mut PortInterface, outputs: &mut PortInterface) -> usize;
}

/// A fabric that never fires.
#[derive(Debug, Default, Clone)]
pub struct NullFabric;

impl ComputeFabric for NullFabric {
    fn configure(&mut self, _config: &FabricConfig) {}

    fn fire(&mut self, _inputs: &mut PortInterface, _outputs: &mut PortInterface) -> usize {
        0
    }
}

/// Copies each instance from an input port to an output port unchanged.
#[derive(Debug, Default, Clone)]
pub struct Passthrough {
    /// (input port, output port)
    routes: Vec<(usize, usize)>,
}

impl Passthrough {
    pub fn new(routes: Vec<(usize, usize)>) -> Self {
        Self { routes }
    }

    pub fn routes(&self) -> &[(usize, usize)] {
        &self.routes
    }
}

impl ComputeFabric for Passthrough {
    fn configure(&mut self, config: &FabricConfig) {
        let before = self.routes.len();
        self.routes.retain(|&(i, o)| {
            config.lanes(PortDirection::Input, i).is_some()
                && config.lanes(PortDirection::Output, o).is_some()
        });
        if self.routes.len() != before {
            log::warn!(
                "Passthrough: dropped {} routes with unmapped ports",
                before - self.routes.len()
            );
        }
    }

    fn fire(&mut self, inputs: &mut PortInterface, outputs: &mut PortInterface) -> usize {
        let mut fired = 0;
        for &(i, o) in &self.routes {
            let ready = matches!(inputs.get(i), Some(p) if p.num_ready() > 0)
                && matches!(outputs.get(o), Some(p) if p.can_push_instance());
            if !ready {
                continue;
            }
            let (Some(input), Some(output)) = (inputs.get_mut(i), outputs.get_mut(o)) else {
                continue;
            };
            if let Some(instance) = input.pop_instance() {
                if output.push_instance(&instance) {
                    fired += 1;
                } else {
                    log::warn!("Passthrough: lane mismatch in{} -> out{}", i, o);
                }
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_roundtrip() {
        let config = FabricConfig {
            inputs: vec![(1, 2), (4, 1)],
            outputs: vec![(2, 2)],
        };
        let words = config.encode();
        assert_eq!(words.len(), 3);
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        assert_eq!(FabricConfig::decode(&bytes), config);
        assert_eq!(config.lanes(PortDirection::Input, 4), Some(1));
        assert_eq!(config.lanes(PortDirection::Output, 4), None);
    }

    #[test]
    fn test_decode_skips_zero_words() {
        let bytes = [0u8; 16];
        assert_eq!(FabricConfig::decode(&bytes), FabricConfig::default());
    }

    #[test]
    fn test_passthrough_moves_instances() {
        let mut inputs = PortInterface::new(PortDirection::Input, 4, 16);
        let mut outputs = PortInterface::new(PortDirection::Output, 4, 16);
        inputs.get_mut(1).unwrap().set_lanes(1);
        outputs.get_mut(2).unwrap().set_lanes(1);

        let input = inputs.get_mut(1).unwrap();
        input.push(7);
        input.push(8);
        input.reformat_in();

        let mut fabric = Passthrough::new(vec![(1, 2)]);
        assert_eq!(fabric.fire(&mut inputs, &mut outputs), 1);
        assert_eq!(fabric.fire(&mut inputs, &mut outputs), 1);
        assert_eq!(fabric.fire(&mut inputs, &mut outputs), 0);

        let output = outputs.get_mut(2).unwrap();
        output.reformat_out();
        assert_eq!(output.words().collect::<Vec<_>>(), vec![7, 8]);
    }

    #[test]
    fn test_passthrough_configure_drops_unmapped() {
        let mut fabric = Passthrough::new(vec![(1, 2), (3, 3)]);
        fabric.configure(&FabricConfig {
            inputs: vec![(1, 1)],
            outputs: vec![(2, 1)],
        });
        assert_eq!(fabric.routes(), &[(1, 2)]);
    }
}
