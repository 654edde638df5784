use std::io::{self, Read, Write};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::NetworkConfig;
use crate::error::StateError;
use crate::neuron::{initial_role, NeuronId, NeuronRecord, Role};
use crate::storage::{self, invalid, ReadImage, WriteImage, TAG_NEUR, TAG_STAT, TAG_SYNZ};
use crate::synapse::{Synapse, SynapseKey};

/// The externally persisted snapshot of a network, and the unit of save/load.
///
/// Neurons are ordered by id and synapses by `(source, target)`, so two
/// snapshots of equal networks compare equal field for field.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NetworkState {
    pub step: u64,
    pub smoothed_feedback: f32,
    pub neurons: Vec<NeuronRecord>,
    pub synapses: Vec<Synapse>,
}

impl NetworkState {
    /// Check that the snapshot fits `cfg` and upholds the network invariants.
    pub fn validate(&self, cfg: &NetworkConfig) -> Result<(), StateError> {
        let expected = cfg.neuron_count();
        if self.neurons.len() != expected {
            return Err(StateError::NeuronCount {
                expected,
                found: self.neurons.len(),
            });
        }
        if !self.smoothed_feedback.is_finite() {
            return Err(StateError::NonFiniteFeedback);
        }

        for (i, n) in self.neurons.iter().enumerate() {
            if n.id as usize != i {
                return Err(StateError::NeuronId { id: n.id });
            }
            let born = initial_role(n.id, cfg.input_size, cfg.hidden_size);
            let ok = match born {
                Role::Hidden => n.role.is_reassignable(),
                fixed => n.role == fixed,
            };
            if !ok {
                return Err(StateError::Role {
                    id: n.id,
                    expected: layout_name(born),
                    found: n.role,
                });
            }
        }

        let mut seen: Vec<SynapseKey> = Vec::with_capacity(self.synapses.len());
        for s in &self.synapses {
            if s.source as usize >= expected || s.target as usize >= expected {
                return Err(StateError::DanglingSynapse {
                    src: s.source,
                    dst: s.target,
                });
            }
            if s.source == s.target {
                return Err(crate::error::SynapseError::SelfLoop(s.source).into());
            }
            if !s.weight.is_finite() || !s.trace.is_finite() {
                return Err(StateError::NonFinite {
                    src: s.source,
                    dst: s.target,
                });
            }
            if s.weight < cfg.min_synaptic_strength || s.weight > cfg.max_synaptic_strength {
                return Err(StateError::WeightOutOfBounds {
                    src: s.source,
                    dst: s.target,
                    weight: s.weight,
                    min: cfg.min_synaptic_strength,
                    max: cfg.max_synaptic_strength,
                });
            }
            seen.push(s.key());
        }
        seen.sort();
        if let Some(w) = seen.windows(2).find(|w| w[0] == w[1]) {
            return Err(crate::error::SynapseError::Duplicate {
                src: w[0].source,
                dst: w[0].target,
            }
            .into());
        }
        Ok(())
    }

    pub fn role_of(&self, id: NeuronId) -> Option<Role> {
        self.neurons.get(id as usize).map(|n| n.role)
    }

    pub fn synapse(&self, source: NeuronId, target: NeuronId) -> Option<&Synapse> {
        let key = SynapseKey::new(source, target);
        self.synapses
            .binary_search_by_key(&key, |s| s.key())
            .ok()
            .map(|i| &self.synapses[i])
    }

    // =========================================================================
    // Binary image
    // =========================================================================

    /// Serialize a versioned, chunked state image.
    pub fn save_image_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(storage::MAGIC)?;
        w.put_u32(storage::VERSION_CURRENT)?;

        let mut stat = Vec::with_capacity(12);
        stat.put_u64(self.step)?;
        stat.put_f32(self.smoothed_feedback)?;
        w.put_chunk(TAG_STAT, &stat)?;

        let mut neur = Vec::with_capacity(4 + self.neurons.len() * 9);
        neur.put_len(self.neurons.len())?;
        for n in &self.neurons {
            neur.put_u32(n.id)?;
            neur.put_u8(n.role.to_u8())?;
            neur.put_u32(n.quiet_steps)?;
        }
        w.put_chunk(TAG_NEUR, &neur)?;

        // Synapses dominate the image and compress well.
        let mut syns = Vec::with_capacity(4 + self.synapses.len() * 28);
        syns.put_len(self.synapses.len())?;
        for s in &self.synapses {
            syns.put_u32(s.source)?;
            syns.put_u32(s.target)?;
            syns.put_f32(s.weight)?;
            syns.put_f32(s.trace)?;
            syns.put_u64(s.age)?;
            syns.put_u32(s.floor_steps)?;
        }
        w.put_chunk_lz4(TAG_SYNZ, &syns)
    }

    /// Load a state image. Unknown chunks are skipped.
    pub fn load_image_from<R: Read>(r: &mut R) -> io::Result<Self> {
        if &r.get_array::<8>()? != storage::MAGIC {
            return Err(invalid("bad state image magic"));
        }
        if r.get_u32()? != storage::VERSION_V1 {
            return Err(invalid("unsupported state image version"));
        }

        let mut stat: Option<(u64, f32)> = None;
        let mut neurons: Option<Vec<NeuronRecord>> = None;
        let mut synapses: Option<Vec<Synapse>> = None;

        while let Some((tag, len)) = r.next_chunk()? {
            let mut chunk = r.take(u64::from(len));
            match tag {
                TAG_STAT => stat = Some((chunk.get_u64()?, chunk.get_f32()?)),
                TAG_NEUR => neurons = Some(read_neurons(&mut chunk)?),
                TAG_SYNZ => {
                    let payload = chunk.get_lz4_payload()?;
                    synapses = Some(read_synapses(&mut payload.as_slice())?);
                }
                _ => {}
            }
            // Skip whatever the match arm left unread.
            io::copy(&mut chunk, &mut io::sink())?;
        }

        let (step, smoothed_feedback) = stat.ok_or_else(|| invalid("missing STAT"))?;
        Ok(Self {
            step,
            smoothed_feedback,
            neurons: neurons.ok_or_else(|| invalid("missing NEUR"))?,
            synapses: synapses.ok_or_else(|| invalid("missing SYNZ"))?,
        })
    }

    /// Exact serialized size in bytes of the state image.
    pub fn image_size_bytes(&self) -> io::Result<usize> {
        let mut cw = storage::CountingWriter::new();
        self.save_image_to(&mut cw)?;
        Ok(cw.written())
    }

    pub fn to_image_bytes(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.save_image_to(&mut out)?;
        Ok(out)
    }

    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    #[cfg(feature = "serde")]
    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

fn read_neurons<R: Read>(r: &mut R) -> io::Result<Vec<NeuronRecord>> {
    let count = r.get_u32()? as usize;
    let mut out = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        let id = r.get_u32()?;
        let role = Role::from_u8(r.get_u8()?).ok_or_else(|| invalid("bad role code"))?;
        let quiet_steps = r.get_u32()?;
        out.push(NeuronRecord {
            id,
            role,
            quiet_steps,
        });
    }
    Ok(out)
}

fn read_synapses<R: Read>(r: &mut R) -> io::Result<Vec<Synapse>> {
    let count = r.get_u32()? as usize;
    let mut out = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        out.push(Synapse {
            source: r.get_u32()?,
            target: r.get_u32()?,
            weight: r.get_f32()?,
            trace: r.get_f32()?,
            age: r.get_u64()?,
            floor_steps: r.get_u32()?,
        });
    }
    Ok(out)
}

fn layout_name(role: Role) -> &'static str {
    match role {
        Role::Input => "input",
        Role::Output => "output",
        Role::Hidden | Role::Dynamic => "hidden or dynamic",
    }
}
