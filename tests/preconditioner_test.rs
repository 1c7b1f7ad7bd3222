//! Preconditioner sensitivity: the solve must succeed across block counts.

mod common;

use common::mesh;
use gridflow::{solve, PowerFlowOptions, SolverKind};

#[test]
fn medium_mesh_converges_for_every_partition_count() {
    let net = mesh(16, 16);
    for nparts in [4, 8, 16, 32, 64] {
        let opts = PowerFlowOptions {
            solver: SolverKind::BiCgStab,
            npartitions: nparts,
            ..Default::default()
        };
        let sol = solve(&net, &opts).unwrap();
        assert!(
            sol.converged,
            "B = {nparts}: diverged with residual {}",
            sol.residual_norm
        );
        assert!(sol.total_linsolve_iters > 0);
    }
}

#[test]
fn gmres_tolerates_partition_sweep_too() {
    let net = mesh(12, 12);
    for nparts in [4, 16, 48] {
        let opts = PowerFlowOptions {
            solver: SolverKind::Gmres,
            npartitions: nparts,
            ..Default::default()
        };
        let sol = solve(&net, &opts).unwrap();
        assert!(sol.converged, "B = {nparts}: diverged");
    }
}

/// Full-size sweep; minutes of runtime, so opt in with --ignored.
#[test]
#[ignore]
fn thirty_thousand_bus_mesh_converges_for_every_partition_count() {
    let net = mesh(150, 200);
    assert_eq!(net.nbus, 30_000);
    for nparts in [32, 64, 128, 256, 512, 1024] {
        let opts = PowerFlowOptions {
            solver: SolverKind::BiCgStab,
            npartitions: nparts,
            ..Default::default()
        };
        let sol = solve(&net, &opts).unwrap();
        assert!(
            sol.converged,
            "B = {nparts}: diverged with residual {}",
            sol.residual_norm
        );
    }
}
