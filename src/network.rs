//! Network model and problem assembly.
//!
//! Builds the bus admittance matrix from bus/branch records, classifies buses
//! (slack/PV/PQ), and produces the immutable [`Network`] the solver runs
//! against. A `Network` is constructed once and never mutated; everything
//! downstream borrows it.

use num_complex::Complex64;

use crate::error::{GridflowError, Result};
use crate::sparse::{CscMatrix, CsrMatrix};

/// Bus classification for power flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    /// Voltage magnitude and angle fixed; absorbs the network power imbalance.
    Slack,
    /// Active power and voltage magnitude specified (generator bus).
    Pv,
    /// Active and reactive power specified (load bus).
    Pq,
}

/// Per-bus record, in physical units on the system base.
#[derive(Debug, Clone)]
pub struct Bus {
    pub kind: BusKind,
    /// Load (MW, MVAr).
    pub pd: f64,
    pub qd: f64,
    /// Shunt admittance (MW, MVAr consumed at V = 1 pu).
    pub gs: f64,
    pub bs: f64,
    /// Generation (MW, MVAr).
    pub pg: f64,
    pub qg: f64,
    /// Initial voltage magnitude (pu); the regulated setpoint at slack/PV buses.
    pub vm: f64,
    /// Initial voltage angle (radians).
    pub va: f64,
}

impl Bus {
    /// A load bus with the given demand and a flat 1.0 pu start.
    pub fn load(pd: f64, qd: f64) -> Self {
        Self {
            kind: BusKind::Pq,
            pd,
            qd,
            gs: 0.0,
            bs: 0.0,
            pg: 0.0,
            qg: 0.0,
            vm: 1.0,
            va: 0.0,
        }
    }

    /// A PV generator bus with the given active output and voltage setpoint.
    pub fn generator(pg: f64, vm: f64) -> Self {
        Self {
            kind: BusKind::Pv,
            pd: 0.0,
            qd: 0.0,
            gs: 0.0,
            bs: 0.0,
            pg,
            qg: 0.0,
            vm,
            va: 0.0,
        }
    }

    /// The slack bus with the given voltage setpoint.
    pub fn slack(vm: f64) -> Self {
        Self {
            kind: BusKind::Slack,
            pd: 0.0,
            qd: 0.0,
            gs: 0.0,
            bs: 0.0,
            pg: 0.0,
            qg: 0.0,
            vm,
            va: 0.0,
        }
    }

    pub fn with_load(mut self, pd: f64, qd: f64) -> Self {
        self.pd = pd;
        self.qd = qd;
        self
    }

    pub fn with_shunt(mut self, gs: f64, bs: f64) -> Self {
        self.gs = gs;
        self.bs = bs;
        self
    }
}

/// Transmission line or transformer between two buses (0-based indices).
#[derive(Debug, Clone)]
pub struct Branch {
    pub from: usize,
    pub to: usize,
    /// Series impedance (pu).
    pub r: f64,
    pub x: f64,
    /// Total line charging susceptance (pu).
    pub b: f64,
    /// Off-nominal tap ratio; 0.0 means nominal (1.0).
    pub tap: f64,
    /// Phase shift (radians).
    pub shift: f64,
}

impl Branch {
    /// A plain transmission line.
    pub fn line(from: usize, to: usize, r: f64, x: f64, b: f64) -> Self {
        Self {
            from,
            to,
            r,
            x,
            b,
            tap: 0.0,
            shift: 0.0,
        }
    }

    /// A transformer branch with an off-nominal tap ratio.
    pub fn transformer(from: usize, to: usize, r: f64, x: f64, tap: f64) -> Self {
        Self {
            from,
            to,
            r,
            x,
            b: 0.0,
            tap,
            shift: 0.0,
        }
    }
}

/// Immutable description of a power system ready for power flow.
#[derive(Debug, Clone)]
pub struct Network {
    /// Number of buses.
    pub nbus: usize,
    /// Complex nodal admittance matrix.
    pub ybus: CscMatrix<Complex64>,
    /// Slack bus indices (at least one).
    pub slack: Vec<usize>,
    /// PV bus indices.
    pub pv: Vec<usize>,
    /// PQ bus indices.
    pub pq: Vec<usize>,
    /// Per-bus complex injection (generation minus load, pu).
    pub sbus: Vec<Complex64>,
    /// Initial complex voltage.
    pub v0: Vec<Complex64>,
    /// Real part of Ybus, row-sliced; shares its pattern with `b`.
    pub g: CsrMatrix<f64>,
    /// Imaginary part of Ybus, row-sliced.
    pub b: CsrMatrix<f64>,
    /// Re(sbus), indexed by bus.
    pub pinj: Vec<f64>,
    /// Im(sbus), indexed by bus.
    pub qinj: Vec<f64>,
}

impl Network {
    /// Construct from already-assembled data, validating the structural
    /// preconditions. Fails with `InvalidNetwork` before any derived
    /// structure is built.
    pub fn new(
        ybus: CscMatrix<Complex64>,
        slack: Vec<usize>,
        pv: Vec<usize>,
        pq: Vec<usize>,
        sbus: Vec<Complex64>,
        v0: Vec<Complex64>,
    ) -> Result<Self> {
        let nbus = ybus.nrows;
        if nbus == 0 {
            return Err(GridflowError::InvalidNetwork("empty network".into()));
        }
        if ybus.ncols != nbus {
            return Err(GridflowError::InvalidNetwork(format!(
                "Ybus is {}x{}, expected square",
                ybus.nrows, ybus.ncols
            )));
        }
        if sbus.len() != nbus || v0.len() != nbus {
            return Err(GridflowError::InvalidNetwork(format!(
                "Sbus/V0 lengths {}/{} do not match {} buses",
                sbus.len(),
                v0.len(),
                nbus
            )));
        }
        if slack.is_empty() {
            return Err(GridflowError::InvalidNetwork("no slack bus".into()));
        }

        // slack ∪ pv ∪ pq must partition 0..nbus
        let mut seen = vec![false; nbus];
        for &i in slack.iter().chain(pv.iter()).chain(pq.iter()) {
            if i >= nbus {
                return Err(GridflowError::InvalidNetwork(format!(
                    "bus index {i} out of range (nbus = {nbus})"
                )));
            }
            if seen[i] {
                return Err(GridflowError::InvalidNetwork(format!(
                    "bus {i} appears in more than one index set"
                )));
            }
            seen[i] = true;
        }
        if let Some(i) = seen.iter().position(|&s| !s) {
            return Err(GridflowError::InvalidNetwork(format!(
                "bus {i} is not classified as slack, PV, or PQ"
            )));
        }

        for (i, (s, v)) in sbus.iter().zip(v0.iter()).enumerate() {
            if !s.re.is_finite() || !s.im.is_finite() {
                return Err(GridflowError::InvalidNetwork(format!(
                    "non-finite injection at bus {i}"
                )));
            }
            if !v.re.is_finite() || !v.im.is_finite() {
                return Err(GridflowError::InvalidNetwork(format!(
                    "non-finite initial voltage at bus {i}"
                )));
            }
        }

        if !pattern_symmetric(&ybus) {
            return Err(GridflowError::InvalidNetwork(
                "Ybus pattern is not symmetric".into(),
            ));
        }

        let (g, b) = ybus.split_real_imag();
        let pinj: Vec<f64> = sbus.iter().map(|s| s.re).collect();
        let qinj: Vec<f64> = sbus.iter().map(|s| s.im).collect();

        Ok(Self {
            nbus,
            ybus,
            slack,
            pv,
            pq,
            sbus,
            v0,
            g,
            b,
            pinj,
            qinj,
        })
    }

    /// Assemble a network from bus and branch records.
    ///
    /// Branch admittance uses the standard pi-model with off-nominal taps and
    /// phase shifts; bus shunts are added on the diagonal. Injections and
    /// shunts are scaled by `base_mva` into per-unit.
    pub fn from_components(base_mva: f64, buses: &[Bus], branches: &[Branch]) -> Result<Self> {
        let nbus = buses.len();
        if nbus == 0 {
            return Err(GridflowError::InvalidNetwork("empty network".into()));
        }
        if base_mva <= 0.0 {
            return Err(GridflowError::InvalidNetwork(format!(
                "base MVA must be positive, got {base_mva}"
            )));
        }

        let mut triplets: Vec<(usize, usize, Complex64)> = Vec::with_capacity(4 * branches.len() + nbus);
        for (k, br) in branches.iter().enumerate() {
            if br.from >= nbus || br.to >= nbus {
                return Err(GridflowError::InvalidNetwork(format!(
                    "branch {k} references bus {} or {} outside 0..{nbus}",
                    br.from, br.to
                )));
            }
            if br.from == br.to {
                return Err(GridflowError::InvalidNetwork(format!(
                    "branch {k} connects bus {} to itself",
                    br.from
                )));
            }
            let z = Complex64::new(br.r, br.x);
            if z.norm() == 0.0 {
                return Err(GridflowError::InvalidNetwork(format!(
                    "branch {k} has zero series impedance"
                )));
            }
            let ys = Complex64::new(1.0, 0.0) / z;
            let bc = Complex64::new(0.0, br.b / 2.0);
            let tap = if br.tap == 0.0 { 1.0 } else { br.tap };
            let t = Complex64::from_polar(tap, br.shift);

            let ytt = ys + bc;
            let yff = ytt / (tap * tap);
            let yft = -ys / t.conj();
            let ytf = -ys / t;

            triplets.push((br.from, br.from, yff));
            triplets.push((br.from, br.to, yft));
            triplets.push((br.to, br.from, ytf));
            triplets.push((br.to, br.to, ytt));
        }

        let mut slack = Vec::new();
        let mut pv = Vec::new();
        let mut pq = Vec::new();
        let mut sbus = Vec::with_capacity(nbus);
        let mut v0 = Vec::with_capacity(nbus);
        for (i, bus) in buses.iter().enumerate() {
            match bus.kind {
                BusKind::Slack => slack.push(i),
                BusKind::Pv => pv.push(i),
                BusKind::Pq => pq.push(i),
            }
            if bus.gs != 0.0 || bus.bs != 0.0 {
                triplets.push((i, i, Complex64::new(bus.gs, bus.bs) / base_mva));
            }
            sbus.push(Complex64::new(
                (bus.pg - bus.pd) / base_mva,
                (bus.qg - bus.qd) / base_mva,
            ));
            v0.push(Complex64::from_polar(bus.vm, bus.va));
        }

        let ybus = CscMatrix::from_triplets(nbus, nbus, &triplets);
        Self::new(ybus, slack, pv, pq, sbus, v0)
    }

    pub fn npv(&self) -> usize {
        self.pv.len()
    }

    pub fn npq(&self) -> usize {
        self.pq.len()
    }

    /// Length of the mismatch vector: |pv| + 2|pq|.
    pub fn residual_len(&self) -> usize {
        self.pv.len() + 2 * self.pq.len()
    }
}

/// Check that (i, j) stored implies (j, i) stored.
fn pattern_symmetric(m: &CscMatrix<Complex64>) -> bool {
    use std::collections::HashSet;
    let mut entries = HashSet::with_capacity(m.nnz());
    for col in 0..m.ncols {
        for idx in m.col_pointers[col]..m.col_pointers[col + 1] {
            entries.insert((m.row_indices[idx], col));
        }
    }
    entries.iter().all(|&(r, c)| entries.contains(&(c, r)))
}
