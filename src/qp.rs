use anyhow::Result;
use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, NonnegativeConeT, SolverStatus, SupportedConeT,
    ZeroConeT,
};
use tracing::debug;

/// Convex quadratic program
///
/// ```text
/// minimize    ½ xᵀ P x + qᵀ x
/// subject to  A x = b
///             G x ≤ h
///             lb ≤ x          (optional)
/// ```
#[derive(Clone, Debug)]
pub struct QpProblem {
    pub p: Vec<Vec<f64>>,
    pub q: Vec<f64>,
    pub a: Vec<Vec<f64>>,
    pub b: Vec<f64>,
    pub g: Vec<Vec<f64>>,
    pub h: Vec<f64>,
    pub lb: Option<Vec<f64>>,
}

#[derive(Clone, Debug)]
pub struct QpSolution {
    pub status: SolverStatus,
    pub x: Vec<f64>,
    pub objective: f64,
    pub iterations: u32,
}

/// Solves `problem` and returns `None` unless the solver reports an optimum.
pub fn solve_qp(problem: &QpProblem, max_iter: usize) -> Result<Option<Vec<f64>>> {
    let solution = solve(problem, max_iter)?;
    match solution.status {
        SolverStatus::Solved => Ok(Some(solution.x)),
        status => {
            debug!(
                "QP returned no result: {:?} after {} iterations (objective {:.6e})",
                status, solution.iterations, solution.objective
            );
            Ok(None)
        }
    }
}

fn validate(problem: &QpProblem) -> Result<usize> {
    let n = problem.q.len();
    if n == 0 {
        return Err(anyhow::anyhow!("QP has no variables"));
    }
    if problem.p.len() != n || problem.p.iter().any(|row| row.len() != n) {
        return Err(anyhow::anyhow!("P must be {}x{}", n, n));
    }
    if problem.a.len() != problem.b.len() || problem.a.iter().any(|row| row.len() != n) {
        return Err(anyhow::anyhow!("A/b dimensions do not match {} variables", n));
    }
    if problem.g.len() != problem.h.len() || problem.g.iter().any(|row| row.len() != n) {
        return Err(anyhow::anyhow!("G/h dimensions do not match {} variables", n));
    }
    if problem.lb.as_ref().is_some_and(|lb| lb.len() != n) {
        return Err(anyhow::anyhow!("lb must have {} entries", n));
    }
    let finite = problem.p.iter().flatten().chain(&problem.q).all(|v| v.is_finite())
        && problem.a.iter().flatten().chain(&problem.b).all(|v| v.is_finite())
        && problem.g.iter().flatten().chain(&problem.h).all(|v| v.is_finite())
        && problem.lb.iter().flatten().all(|v| v.is_finite());
    if !finite {
        return Err(anyhow::anyhow!("QP data contains non-finite values"));
    }
    if problem.a.is_empty() && problem.g.is_empty() && problem.lb.is_none() {
        return Err(anyhow::anyhow!("QP has no constraints"));
    }
    Ok(n)
}

/// Column-compressed copy of a dense `rows x n` matrix, skipping exact zeros.
/// With `upper_only`, entries below the diagonal are left out.
fn to_csc(rows: &[Vec<f64>], n: usize, upper_only: bool) -> CscMatrix<f64> {
    let m = rows.len();
    let mut colptr = Vec::with_capacity(n + 1);
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    colptr.push(0);
    for j in 0..n {
        let last_row = if upper_only { (j + 1).min(m) } else { m };
        for (i, row) in rows.iter().enumerate().take(last_row) {
            if row[j] != 0.0 {
                rowval.push(i);
                nzval.push(row[j]);
            }
        }
        colptr.push(nzval.len());
    }
    CscMatrix::new(m, n, colptr, rowval, nzval)
}

/// Interior-point solve of `problem` with at most `max_iter` iterations.
///
/// Returns an error only for malformed input; non-convergence and
/// infeasibility are reported through `status`.
pub fn solve(problem: &QpProblem, max_iter: usize) -> Result<QpSolution> {
    let n = validate(problem)?;

    let p_sym: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| 0.5 * (problem.p[i][j] + problem.p[j][i])).collect())
        .collect();
    let p = to_csc(&p_sym, n, true);

    // Rows of `A x + s = b`: equalities (zero cone) first, then every
    // inequality as `G x ≤ h` (nonnegative cone), lower bounds as `-x ≤ -lb`.
    let mut rows: Vec<Vec<f64>> = problem.a.clone();
    let mut rhs: Vec<f64> = problem.b.clone();
    rows.extend(problem.g.iter().cloned());
    rhs.extend(problem.h.iter().copied());
    if let Some(lb) = &problem.lb {
        for (i, &bound) in lb.iter().enumerate() {
            let mut row = vec![0.0; n];
            row[i] = -1.0;
            rows.push(row);
            rhs.push(-bound);
        }
    }
    let n_eq = problem.a.len();
    let n_ineq = rows.len() - n_eq;
    let a = to_csc(&rows, n, false);

    let mut cones: Vec<SupportedConeT<f64>> = Vec::with_capacity(2);
    if n_eq > 0 {
        cones.push(ZeroConeT(n_eq));
    }
    if n_ineq > 0 {
        cones.push(NonnegativeConeT(n_ineq));
    }

    let settings = DefaultSettingsBuilder::default()
        .max_iter(u32::try_from(max_iter).unwrap_or(u32::MAX))
        .verbose(false)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build solver settings: {}", e))?;

    let mut solver = DefaultSolver::new(&p, &problem.q, &a, &rhs, &cones, settings)
        .map_err(|e| anyhow::anyhow!("Failed to create solver: {:?}", e))?;
    solver.solve();

    Ok(QpSolution {
        status: solver.solution.status,
        x: solver.solution.x.clone(),
        objective: solver.solution.obj_val,
        iterations: solver.solution.iterations,
    })
}
