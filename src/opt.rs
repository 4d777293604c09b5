use anyhow::{Result, bail};
use log::debug;

use crate::utils::{logit, sigmoid};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lo: f64,
    pub hi: f64,
}

pub trait Objective {
    fn dimension(&self) -> usize;
    fn lower_bound(&self, i: usize) -> f64;
    fn upper_bound(&self, i: usize) -> f64;
    fn evaluate(&mut self, x: &[f64]) -> Result<f64>;

    fn bounds(&self) -> Vec<Bounds> {
        (0..self.dimension())
            .map(|i| Bounds {
                lo: self.lower_bound(i),
                hi: self.upper_bound(i),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Raw,
    Negated,
    Rescaled(Vec<f64>),
}

pub struct ObjectiveView<'a, O: Objective + ?Sized> {
    inner: &'a mut O,
    strategy: Strategy,
}

impl<'a, O: Objective + ?Sized> ObjectiveView<'a, O> {
    pub fn new(inner: &'a mut O, strategy: Strategy) -> Result<Self> {
        if let Strategy::Rescaled(scale) = &strategy {
            if scale.len() != inner.dimension() {
                bail!(
                    "scale has {} entries for a {}-dimensional objective",
                    scale.len(),
                    inner.dimension()
                );
            }
            if scale.iter().any(|s| !s.is_finite() || *s <= 0.0) {
                bail!("scale factors must be finite and > 0");
            }
        }
        Ok(Self { inner, strategy })
    }

    fn scale(&self, i: usize) -> f64 {
        match &self.strategy {
            Strategy::Rescaled(s) => s[i],
            _ => 1.0,
        }
    }

    pub fn to_inner(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .enumerate()
            .map(|(i, v)| v * self.scale(i))
            .collect()
    }

    pub fn from_inner(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .enumerate()
            .map(|(i, v)| v / self.scale(i))
            .collect()
    }

    pub fn gradient(&mut self, x: &[f64], eps: f64) -> Result<Vec<f64>> {
        let mut grad = vec![0.0; x.len()];
        for i in 0..x.len() {
            let step = eps * x[i].abs().max(1.0);
            let mut p1 = x.to_vec();
            let mut p2 = x.to_vec();
            p1[i] += step;
            p2[i] -= step;
            let f1 = self.evaluate(&p1)?;
            let f2 = self.evaluate(&p2)?;
            grad[i] = (f1 - f2) / (2.0 * step);
        }
        Ok(grad)
    }
}

impl<O: Objective + ?Sized> Objective for ObjectiveView<'_, O> {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn lower_bound(&self, i: usize) -> f64 {
        self.inner.lower_bound(i) / self.scale(i)
    }

    fn upper_bound(&self, i: usize) -> f64 {
        self.inner.upper_bound(i) / self.scale(i)
    }

    fn evaluate(&mut self, x: &[f64]) -> Result<f64> {
        let inner_x = self.to_inner(x);
        let v = self.inner.evaluate(&inner_x)?;
        Ok(match self.strategy {
            Strategy::Raw => v,
            Strategy::Negated | Strategy::Rescaled(_) => -v,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LbfgsConfig {
    pub max_iters: usize,
    pub lbfgs_m: usize,
    pub grad_eps: f64,
    pub line_search_c1: f64,
    pub max_ls_steps: usize,
    pub tol_grad: f64,
    pub tol_f: f64,
}

impl Default for LbfgsConfig {
    fn default() -> Self {
        Self {
            max_iters: 200,
            lbfgs_m: 7,
            grad_eps: 1e-5,
            line_search_c1: 1e-4,
            max_ls_steps: 30,
            tol_grad: 1e-6,
            tol_f: 1e-10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
}

struct Unconstrained<'a, O: Objective + ?Sized> {
    inner: &'a mut O,
    bounds: Vec<Bounds>,
}

impl<O: Objective + ?Sized> Unconstrained<'_, O> {
    fn cost(&mut self, p: &[f64]) -> Result<f64> {
        let x = from_unconstrained(p, &self.bounds)?;
        let v = self.inner.evaluate(&x)?;
        // Infeasible points become uphill so the line search backs off.
        Ok(if v.is_nan() { f64::INFINITY } else { v })
    }

    fn grad(&mut self, p: &[f64], eps: f64) -> Result<Vec<f64>> {
        let mut grad = vec![0.0; p.len()];
        for i in 0..p.len() {
            let step = eps * p[i].abs().max(1.0);
            let mut p1 = p.to_vec();
            let mut p2 = p.to_vec();
            p1[i] += step;
            p2[i] -= step;
            let f1 = self.cost(&p1)?;
            let f2 = self.cost(&p2)?;
            let g = (f1 - f2) / (2.0 * step);
            grad[i] = if g.is_finite() { g } else { 0.0 };
        }
        Ok(grad)
    }
}

fn to_unconstrained(params: &[f64], bounds: &[Bounds]) -> Result<Vec<f64>> {
    if params.len() != bounds.len() {
        bail!("bounds length mismatch");
    }
    let mut out = Vec::with_capacity(params.len());
    for (x, b) in params.iter().zip(bounds.iter()) {
        let z = (x - b.lo) / (b.hi - b.lo);
        let z = z.clamp(1e-12, 1.0 - 1e-12);
        out.push(logit(z));
    }
    Ok(out)
}

fn from_unconstrained(p: &[f64], bounds: &[Bounds]) -> Result<Vec<f64>> {
    if p.len() != bounds.len() {
        bail!("bounds length mismatch");
    }
    let mut out = Vec::with_capacity(p.len());
    for (v, b) in p.iter().zip(bounds.iter()) {
        let z = sigmoid(*v);
        out.push(b.lo + (b.hi - b.lo) * z);
    }
    Ok(out)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

pub fn minimize_lbfgs<O: Objective + ?Sized>(
    objective: &mut O,
    x0: &[f64],
    config: &LbfgsConfig,
) -> Result<Minimum> {
    let bounds = objective.bounds();
    if let Some(b) = bounds.iter().find(|b| !(b.lo < b.hi)) {
        bail!("invalid bounds [{}, {}]", b.lo, b.hi);
    }
    let mut problem = Unconstrained {
        inner: objective,
        bounds,
    };

    let mut xk = to_unconstrained(x0, &problem.bounds)?;
    let mut fk = problem.cost(&xk)?;
    let mut gk = problem.grad(&xk, config.grad_eps)?;

    let mut s_hist: Vec<Vec<f64>> = Vec::new();
    let mut y_hist: Vec<Vec<f64>> = Vec::new();
    let mut rho_hist: Vec<f64> = Vec::new();

    let mut iterations = 0;
    for _ in 0..config.max_iters {
        if norm(&gk) < config.tol_grad {
            break;
        }
        iterations += 1;

        let mut q = gk.clone();
        let mut alpha = vec![0.0; s_hist.len()];
        for i in (0..s_hist.len()).rev() {
            let a = rho_hist[i] * dot(&s_hist[i], &q);
            alpha[i] = a;
            for j in 0..q.len() {
                q[j] -= a * y_hist[i][j];
            }
        }
        let mut r = match (s_hist.last(), y_hist.last()) {
            (Some(s_last), Some(y_last)) => {
                let ys = dot(y_last, s_last);
                let yy = dot(y_last, y_last);
                let h0 = if yy > 0.0 { ys / yy } else { 1.0 };
                q.iter().map(|v| v * h0).collect::<Vec<f64>>()
            }
            _ => q.clone(),
        };
        for i in 0..s_hist.len() {
            let beta = rho_hist[i] * dot(&y_hist[i], &r);
            for j in 0..r.len() {
                r[j] += s_hist[i][j] * (alpha[i] - beta);
            }
        }
        for v in r.iter_mut() {
            *v = -*v;
        }

        let mut gdotp = dot(&gk, &r);
        if gdotp >= 0.0 {
            // Not a descent direction; restart from steepest descent.
            s_hist.clear();
            y_hist.clear();
            rho_hist.clear();
            r = gk.iter().map(|g| -g).collect();
            gdotp = dot(&gk, &r);
        }

        let mut step = 1.0;
        let mut x_new = xk.clone();
        let mut f_new = fk;
        let mut ls_ok = false;
        for _ in 0..config.max_ls_steps {
            for i in 0..xk.len() {
                x_new[i] = xk[i] + step * r[i];
            }
            f_new = problem.cost(&x_new)?;
            if f_new.is_finite() && f_new <= fk + config.line_search_c1 * step * gdotp {
                ls_ok = true;
                break;
            }
            step *= 0.5;
        }
        if !ls_ok {
            debug!("line search failed after {iterations} iterations");
            break;
        }

        let g_new = problem.grad(&x_new, config.grad_eps)?;
        let mut s = vec![0.0; xk.len()];
        let mut y = vec![0.0; xk.len()];
        for i in 0..xk.len() {
            s[i] = x_new[i] - xk[i];
            y[i] = g_new[i] - gk[i];
        }
        let ys = dot(&y, &s);
        if ys > 1e-12 {
            if s_hist.len() == config.lbfgs_m {
                s_hist.remove(0);
                y_hist.remove(0);
                rho_hist.remove(0);
            }
            s_hist.push(s);
            y_hist.push(y);
            rho_hist.push(1.0 / ys);
        }

        let improvement = fk - f_new;
        xk = x_new;
        gk = g_new;
        fk = f_new;
        debug!("L-BFGS iteration {iterations}: f = {fk}");
        if improvement.abs() <= config.tol_f * fk.abs().max(1.0) {
            break;
        }
    }

    Ok(Minimum {
        x: from_unconstrained(&xk, &problem.bounds)?,
        value: fk,
        iterations,
    })
}
