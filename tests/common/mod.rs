//! Shared fixtures: reference networks and finite-difference Jacobians.
#![allow(dead_code)]

use gridflow::residual::power_mismatch;
use gridflow::{Branch, Bus, Network};

/// 9-bus test system (3 generators, 3 loads, 9 branches, 100 MVA base).
pub fn case9() -> Network {
    let buses = vec![
        Bus::slack(1.0),
        Bus::generator(163.0, 1.0),
        Bus::generator(85.0, 1.0),
        Bus::load(0.0, 0.0),
        Bus::load(90.0, 30.0),
        Bus::load(0.0, 0.0),
        Bus::load(100.0, 35.0),
        Bus::load(0.0, 0.0),
        Bus::load(125.0, 50.0),
    ];
    let branches = vec![
        Branch::line(0, 3, 0.0, 0.0576, 0.0),
        Branch::line(3, 4, 0.017, 0.092, 0.158),
        Branch::line(4, 5, 0.039, 0.17, 0.358),
        Branch::line(2, 5, 0.0, 0.0586, 0.0),
        Branch::line(5, 6, 0.0119, 0.1008, 0.209),
        Branch::line(6, 7, 0.0085, 0.072, 0.149),
        Branch::line(7, 1, 0.0, 0.0625, 0.0),
        Branch::line(7, 8, 0.032, 0.161, 0.306),
        Branch::line(8, 3, 0.01, 0.085, 0.176),
    ];
    Network::from_components(100.0, &buses, &branches).unwrap()
}

/// 14-bus test system (5 generators, 3 transformers, one bus shunt).
pub fn case14() -> Network {
    let buses = vec![
        Bus::slack(1.06),
        Bus::generator(40.0, 1.045).with_load(21.7, 12.7),
        Bus::generator(0.0, 1.01).with_load(94.2, 19.0),
        Bus::load(47.8, -3.9),
        Bus::load(7.6, 1.6),
        Bus::generator(0.0, 1.07).with_load(11.2, 7.5),
        Bus::load(0.0, 0.0),
        Bus::generator(0.0, 1.09),
        Bus::load(29.5, 16.6).with_shunt(0.0, 19.0),
        Bus::load(9.0, 5.8),
        Bus::load(3.5, 1.8),
        Bus::load(6.1, 1.6),
        Bus::load(13.5, 5.8),
        Bus::load(14.9, 5.0),
    ];
    let branches = vec![
        Branch::line(0, 1, 0.01938, 0.05917, 0.0528),
        Branch::line(0, 4, 0.05403, 0.22304, 0.0492),
        Branch::line(1, 2, 0.04699, 0.19797, 0.0438),
        Branch::line(1, 3, 0.05811, 0.17632, 0.0340),
        Branch::line(1, 4, 0.05695, 0.17388, 0.0346),
        Branch::line(2, 3, 0.06701, 0.17103, 0.0128),
        Branch::line(3, 4, 0.01335, 0.04211, 0.0),
        Branch::transformer(3, 6, 0.0, 0.20912, 0.978),
        Branch::transformer(3, 8, 0.0, 0.55618, 0.969),
        Branch::transformer(4, 5, 0.0, 0.25202, 0.932),
        Branch::line(5, 10, 0.09498, 0.19890, 0.0),
        Branch::line(5, 11, 0.12291, 0.25581, 0.0),
        Branch::line(5, 12, 0.06615, 0.13027, 0.0),
        Branch::line(6, 7, 0.0, 0.17615, 0.0),
        Branch::line(6, 8, 0.0, 0.11001, 0.0),
        Branch::line(8, 9, 0.03181, 0.08450, 0.0),
        Branch::line(8, 13, 0.12711, 0.27038, 0.0),
        Branch::line(9, 10, 0.08205, 0.19207, 0.0),
        Branch::line(11, 12, 0.22092, 0.19988, 0.0),
        Branch::line(12, 13, 0.17093, 0.34802, 0.0),
    ];
    Network::from_components(100.0, &buses, &branches).unwrap()
}

/// Synthetic rows x cols grid network: slack at the origin, a PV generator on
/// every ninth bus, small loads elsewhere. Locally balanced so flat-start
/// Newton converges at any size.
pub fn mesh(rows: usize, cols: usize) -> Network {
    let n = rows * cols;
    let mut buses = Vec::with_capacity(n);
    for i in 0..n {
        if i == 0 {
            buses.push(Bus::slack(1.0));
        } else if i % 9 == 4 {
            buses.push(Bus::generator(4.0, 1.02));
        } else {
            buses.push(Bus::load(0.5, 0.15));
        }
    }
    let mut branches = Vec::new();
    for r in 0..rows {
        for c in 0..cols {
            let i = r * cols + c;
            if c + 1 < cols {
                branches.push(Branch::line(
                    i,
                    i + 1,
                    0.01 + 0.001 * (i % 7) as f64,
                    0.05 + 0.002 * (i % 5) as f64,
                    0.02,
                ));
            }
            if r + 1 < rows {
                branches.push(Branch::line(
                    i,
                    i + cols,
                    0.01 + 0.001 * (i % 3) as f64,
                    0.06,
                    0.02,
                ));
            }
        }
    }
    Network::from_components(100.0, &buses, &branches).unwrap()
}

/// Dense central-difference Jacobian over the state variables
/// (θ_pv, θ_pq, Vm_pq), for cross-checking the AD engine.
pub fn fd_state_jacobian(net: &Network, vm: &[f64], va: &[f64]) -> Vec<Vec<f64>> {
    let nf = net.residual_len();
    let h = 1e-7;
    let mut jac = vec![vec![0.0; nf]; nf];

    let eval = |vm: &[f64], va: &[f64]| {
        let mut f = vec![0.0; nf];
        gridflow::residual::network_mismatch(net, vm, va, &mut f);
        f
    };

    let mut col = 0;
    let mut push_col = |jac: &mut Vec<Vec<f64>>, fp: Vec<f64>, fm: Vec<f64>| {
        for i in 0..nf {
            jac[i][col] = (fp[i] - fm[i]) / (2.0 * h);
        }
        col += 1;
    };

    for &b in net.pv.iter().chain(net.pq.iter()) {
        let mut va_p = va.to_vec();
        let mut va_m = va.to_vec();
        va_p[b] += h;
        va_m[b] -= h;
        let fp = eval(vm, &va_p);
        let fm = eval(vm, &va_m);
        push_col(&mut jac, fp, fm);
    }
    for &b in &net.pq {
        let mut vm_p = vm.to_vec();
        let mut vm_m = vm.to_vec();
        vm_p[b] += h;
        vm_m[b] -= h;
        let fp = eval(&vm_p, va);
        let fm = eval(&vm_m, va);
        push_col(&mut jac, fp, fm);
    }
    jac
}

/// Dense central-difference Jacobian over the control variables
/// (θ_slack, Vm_pv, Pinj_pq).
pub fn fd_design_jacobian(net: &Network, vm: &[f64], va: &[f64]) -> Vec<Vec<f64>> {
    let nf = net.residual_len();
    let ncols = net.slack.len() + net.pv.len() + net.pq.len();
    let h = 1e-7;
    let mut jac = vec![vec![0.0; ncols]; nf];

    let eval = |vm: &[f64], va: &[f64], pinj: &[f64]| {
        let mut f = vec![0.0; nf];
        power_mismatch(
            vm, va, pinj, &net.qinj, &net.g, &net.b, &net.pv, &net.pq, &mut f,
        );
        f
    };

    let mut col = 0;
    let mut write_col = |jac: &mut Vec<Vec<f64>>, col: usize, fp: &[f64], fm: &[f64]| {
        for i in 0..nf {
            jac[i][col] = (fp[i] - fm[i]) / (2.0 * h);
        }
    };

    for &b in &net.slack {
        let mut va_p = va.to_vec();
        let mut va_m = va.to_vec();
        va_p[b] += h;
        va_m[b] -= h;
        write_col(&mut jac, col, &eval(vm, &va_p, &net.pinj), &eval(vm, &va_m, &net.pinj));
        col += 1;
    }
    for &b in &net.pv {
        let mut vm_p = vm.to_vec();
        let mut vm_m = vm.to_vec();
        vm_p[b] += h;
        vm_m[b] -= h;
        write_col(&mut jac, col, &eval(&vm_p, va, &net.pinj), &eval(&vm_m, va, &net.pinj));
        col += 1;
    }
    for &b in &net.pq {
        let mut pinj_p = net.pinj.clone();
        let mut pinj_m = net.pinj.clone();
        pinj_p[b] += h;
        pinj_m[b] -= h;
        write_col(&mut jac, col, &eval(vm, va, &pinj_p), &eval(vm, va, &pinj_m));
        col += 1;
    }
    jac
}

/// Polar decomposition of a solved voltage vector.
pub fn polar(v: &[num_complex::Complex64]) -> (Vec<f64>, Vec<f64>) {
    (
        v.iter().map(|x| x.norm()).collect(),
        v.iter().map(|x| x.arg()).collect(),
    )
}
