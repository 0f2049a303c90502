use approx::assert_relative_eq;
use ndarray::{arr1, ArrayD};
use param_adjoint::{
    Assignable, Block, Parameter, Result, Tape, VarId,
};

fn dyn1(v: &[f64]) -> ArrayD<f64> {
    arr1(v).into_dyn()
}

/// `y = alpha * x`, a non-identity block to check chaining through the sweeps.
#[derive(Debug)]
struct ScaleBlock {
    alpha: f64,
    deps: [VarId; 1],
    outs: Vec<VarId>,
}

impl ScaleBlock {
    fn new(alpha: f64, x: VarId) -> Self {
        ScaleBlock {
            alpha,
            deps: [x],
            outs: Vec::new(),
        }
    }

    fn scaled(&self, q: &[Option<ArrayD<f64>>]) -> Option<ArrayD<f64>> {
        q.first()?.as_ref().map(|a| a * self.alpha)
    }
}

impl Block<f64> for ScaleBlock {
    fn dependencies(&self) -> &[VarId] {
        &self.deps
    }

    fn outputs(&self) -> &[VarId] {
        &self.outs
    }

    fn add_output(&mut self, output: VarId) {
        self.outs.push(output);
    }

    fn evaluate_adj_component(
        &self,
        _inputs: &[ArrayD<f64>],
        adj_inputs: &[Option<ArrayD<f64>>],
        _idx: usize,
    ) -> Option<ArrayD<f64>> {
        self.scaled(adj_inputs)
    }

    fn evaluate_tlm_component(
        &self,
        _inputs: &[ArrayD<f64>],
        tlm_inputs: &[Option<ArrayD<f64>>],
        _output_shape: &[usize],
        _idx: usize,
    ) -> Option<ArrayD<f64>> {
        self.scaled(tlm_inputs)
    }

    fn evaluate_hessian_component(
        &self,
        _inputs: &[ArrayD<f64>],
        hessian_inputs: &[Option<ArrayD<f64>>],
        _adj_inputs: &[Option<ArrayD<f64>>],
        _idx: usize,
    ) -> Option<ArrayD<f64>> {
        self.scaled(hessian_inputs)
    }

    fn recompute_component(
        &self,
        inputs: &[ArrayD<f64>],
        _output_shape: &[usize],
        _idx: usize,
    ) -> Result<ArrayD<f64>> {
        Ok(&inputs[0] * self.alpha)
    }
}

/// Record `m -> c (assign) -> y = 3 c (scale)`, returning (m var, c, y var).
fn record_chain(tape: &mut Tape<f64>) -> (VarId, Parameter<f64>, VarId) {
    let m = Parameter::from_vec(vec![1.0, 2.0]);
    let m_var = m.block_variable(tape);
    let mut c = Parameter::from_vec(vec![0.0, 0.0]);
    c.assign(&m, Some(&mut *tape)).unwrap();

    let c_var = c.current_block_variable().unwrap();
    let b = tape.add_block(Box::new(ScaleBlock::new(3.0, c_var)));
    let y = tape
        .add_output(b, &c.values().mapv(|v| 3.0 * v))
        .unwrap();
    (m_var, c, y)
}

// ── Identity law of the assignment record ──

#[test]
fn assign_block_adjoint_is_identity() {
    let mut tape = Tape::new();
    let src = Parameter::from_vec(vec![1.0, 2.0]);
    let src_var = src.block_variable(&mut tape);
    let mut c = Parameter::from_vec(vec![0.0, 0.0]);
    c.assign(&src, Some(&mut tape)).unwrap();

    let out = c.current_block_variable().unwrap();
    tape.seed_adjoint(out, dyn1(&[0.3, -1.5])).unwrap();
    tape.evaluate_adj().unwrap();

    let adj = tape.variable(src_var).unwrap().adj_value().unwrap();
    assert_eq!(adj, &dyn1(&[0.3, -1.5]));
}

#[test]
fn assign_block_tangent_is_identity() {
    let mut tape = Tape::new();
    let src = Parameter::from_vec(vec![1.0, 2.0]);
    let src_var = src.block_variable(&mut tape);
    let mut c = Parameter::from_vec(vec![0.0, 0.0]);
    c.assign(&src, Some(&mut tape)).unwrap();

    tape.seed_tangent(src_var, dyn1(&[1.0, 0.0])).unwrap();
    tape.evaluate_tlm().unwrap();

    let out = c.current_block_variable().unwrap();
    assert_eq!(tape.variable(out).unwrap().tlm_value().unwrap(), &dyn1(&[1.0, 0.0]));
}

#[test]
fn assign_block_hessian_is_identity() {
    let mut tape = Tape::new();
    let src = Parameter::from_vec(vec![1.0, 2.0]);
    let src_var = src.block_variable(&mut tape);
    let mut c = Parameter::from_vec(vec![0.0, 0.0]);
    c.assign(&src, Some(&mut tape)).unwrap();

    let out = c.current_block_variable().unwrap();
    tape.seed_hessian(out, dyn1(&[4.0, 5.0])).unwrap();
    tape.evaluate_hessian().unwrap();

    assert_eq!(
        tape.variable(src_var).unwrap().hessian_value().unwrap(),
        &dyn1(&[4.0, 5.0])
    );
}

// ── Chaining with a custom block ──

#[test]
fn adjoint_through_chain() {
    let mut tape = Tape::new();
    let (m_var, _c, y) = record_chain(&mut tape);

    tape.seed_adjoint(y, dyn1(&[1.0, 1.0])).unwrap();
    tape.evaluate_adj().unwrap();

    let g = tape.variable(m_var).unwrap().adj_value().unwrap();
    assert_relative_eq!(g[[0]], 3.0);
    assert_relative_eq!(g[[1]], 3.0);
}

#[test]
fn get_derivative_reads_current_position() {
    let mut tape = Tape::new();
    let (_m, c, y) = record_chain(&mut tape);

    tape.seed_adjoint(y, dyn1(&[2.0, -1.0])).unwrap();
    tape.evaluate_adj().unwrap();

    let d = c.get_derivative(&tape).unwrap();
    assert_eq!(d.to_list(), vec![6.0, -3.0]);
    assert_eq!(d.shape(), c.shape());
}

#[test]
fn get_derivative_without_adjoint_is_zero() {
    let mut tape = Tape::new();
    let c = Parameter::from_vec(vec![1.0, 2.0]);
    c.block_variable(&mut tape);
    assert_eq!(c.get_derivative(&tape).unwrap().to_list(), vec![0.0, 0.0]);
}

#[test]
fn get_derivative_requires_registration() {
    let tape = Tape::<f64>::new();
    let c = Parameter::from_vec(vec![1.0]);
    assert!(c.get_derivative(&tape).is_err());
}

#[test]
fn adjoints_accumulate_across_uses() {
    let mut tape = Tape::new();
    let m = Parameter::from_vec(vec![1.0]);
    let m_var = m.block_variable(&mut tape);
    let mut a = Parameter::from_vec(vec![0.0]);
    let mut b = Parameter::from_vec(vec![0.0]);
    a.assign(&m, Some(&mut tape)).unwrap();
    b.assign(&m, Some(&mut tape)).unwrap();

    tape.seed_adjoint(a.current_block_variable().unwrap(), dyn1(&[1.0]))
        .unwrap();
    tape.seed_adjoint(b.current_block_variable().unwrap(), dyn1(&[2.0]))
        .unwrap();
    tape.evaluate_adj().unwrap();

    assert_relative_eq!(tape.variable(m_var).unwrap().adj_value().unwrap()[[0]], 3.0);
}

#[test]
fn tangent_through_chain() {
    let mut tape = Tape::new();
    let (m_var, _c, y) = record_chain(&mut tape);

    tape.seed_tangent(m_var, dyn1(&[0.0, 1.0])).unwrap();
    tape.evaluate_tlm().unwrap();

    assert_eq!(tape.variable(y).unwrap().tlm_value().unwrap(), &dyn1(&[0.0, 3.0]));
}

#[test]
fn reset_clears_sensitivities() {
    let mut tape = Tape::new();
    let (m_var, _c, y) = record_chain(&mut tape);
    tape.seed_adjoint(y, dyn1(&[1.0, 1.0])).unwrap();
    tape.evaluate_adj().unwrap();
    assert!(tape.variable(m_var).unwrap().adj_value().is_some());

    tape.reset_variables();
    assert!(tape.variable(m_var).unwrap().adj_value().is_none());
    assert!(tape.variable(y).unwrap().adj_value().is_none());
}

// ── Recompute and value updates ──

#[test]
fn recompute_replays_from_updated_control() {
    let mut tape = Tape::new();
    let m = Parameter::from_vec(vec![1.0, 2.0]);
    m.block_variable(&mut tape);
    let mut c = Parameter::from_vec(vec![0.0, 0.0]);
    c.assign(&m, Some(&mut tape)).unwrap();
    let c_var = c.current_block_variable().unwrap();
    let b = tape.add_block(Box::new(ScaleBlock::new(3.0, c_var)));
    let y = tape.add_output(b, &c.values().mapv(|v| 3.0 * v)).unwrap();

    // Push a new control value in without recording it.
    m.adj_update_value(&Parameter::from_vec(vec![10.0, 20.0]), &mut tape)
        .unwrap();
    tape.recompute().unwrap();

    let c_now = tape.variable(c_var).unwrap().checkpoint().unwrap();
    assert_eq!(c_now.values(), &dyn1(&[10.0, 20.0]));
    let y_now = tape.variable(y).unwrap().checkpoint().unwrap();
    assert_eq!(y_now.values(), &dyn1(&[30.0, 60.0]));
}

#[test]
fn recompute_keeps_output_shape() {
    let mut tape = Tape::new();
    let mut m = Parameter::from_shape_vec(&[2, 2], vec![0.0; 4]).unwrap();
    m.assign(vec![1.0, 2.0, 3.0, 4.0], Some(&mut tape)).unwrap();
    tape.recompute().unwrap();

    let out = tape
        .variable(m.current_block_variable().unwrap())
        .unwrap()
        .checkpoint()
        .unwrap();
    assert_eq!(out.shape(), &[2, 2]);
    assert_eq!(out.to_parameter().to_list(), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn adj_update_value_checks_size() {
    let mut tape = Tape::new();
    let m = Parameter::from_vec(vec![1.0, 2.0]);
    m.block_variable(&mut tape);
    let err = m.adj_update_value(&Parameter::from_vec(vec![1.0]), &mut tape);
    assert!(err.is_err());
}

#[test]
fn clear_empties_tape() {
    let mut tape = Tape::new();
    let (_m, _c, _y) = record_chain(&mut tape);
    assert_eq!(tape.len(), 2);
    tape.clear();
    assert!(tape.is_empty());
    assert_eq!(tape.num_variables(), 0);
    assert!(tape.is_annotating());
}

// ── Parameters across tape lifetimes ──

#[test]
fn cleared_tape_does_not_reuse_stale_variables() {
    let mut tape = Tape::new();
    let mut c = Parameter::from_vec(vec![1.0, 2.0]);
    c.assign([3.0, 4.0], Some(&mut tape)).unwrap();
    tape.clear();

    // Refill the slots the cleared variables used to occupy.
    let mut x = Parameter::from_vec(vec![0.0, 0.0]);
    x.assign([9.0, 9.0], Some(&mut tape)).unwrap();

    let mut d = Parameter::from_vec(vec![0.0, 0.0]);
    d.assign(&c, Some(&mut tape)).unwrap();

    let block = tape.blocks().last().unwrap();
    let dep = tape.variable(block.dependencies()[0]).unwrap();
    assert_eq!(dep.checkpoint().unwrap().values(), &dyn1(&[3.0, 4.0]));

    tape.recompute().unwrap();
    let d_var = d.block_variable_on(&tape).unwrap();
    let d_now = tape.variable(d_var).unwrap().checkpoint().unwrap();
    assert_eq!(d_now.values(), &dyn1(&[3.0, 4.0]));
}

#[test]
fn parameter_moves_to_a_second_tape() {
    let mut first = Tape::new();
    let mut c = Parameter::from_vec(vec![1.0, 2.0]);
    c.assign([3.0, 4.0], Some(&mut first)).unwrap();

    let mut second = Tape::new();
    assert_eq!(c.block_variable_on(&second), None);
    assert!(c.get_derivative(&second).is_err());

    let mut d = Parameter::from_vec(vec![0.0, 0.0]);
    d.assign(&c, Some(&mut second)).unwrap();
    let c_var = c.block_variable_on(&second).unwrap();

    let out = d.block_variable_on(&second).unwrap();
    second.seed_adjoint(out, dyn1(&[1.0, -1.0])).unwrap();
    second.evaluate_adj().unwrap();
    assert_eq!(c.get_derivative(&second).unwrap().to_list(), vec![1.0, -1.0]);
    assert!(second.variable(c_var).unwrap().creator().is_none());

    // The first tape still sees its own recording.
    assert!(c.block_variable_on(&first).is_none());
    assert_eq!(first.len(), 1);
}

#[test]
fn rollback_forgets_registrations_past_the_mark() {
    let mut tape = Tape::new();
    let m = Parameter::from_vec(vec![1.0]);
    let m_var = m.block_variable(&mut tape);
    let mark = tape.mark();

    let c = Parameter::from_vec(vec![2.0]);
    c.block_variable(&mut tape);
    tape.rollback(mark);

    assert_eq!(m.block_variable_on(&tape), Some(m_var));
    assert_eq!(c.block_variable_on(&tape), None);
    let fresh = c.block_variable(&mut tape);
    assert_eq!(
        tape.variable(fresh).unwrap().checkpoint().unwrap().values(),
        &dyn1(&[2.0])
    );
}

#[test]
fn adj_update_value_after_clear_needs_registration() {
    let mut tape = Tape::new();
    let m = Parameter::from_vec(vec![1.0]);
    m.block_variable(&mut tape);
    tape.clear();

    let update = Parameter::from_vec(vec![5.0]);
    assert!(matches!(
        m.adj_update_value(&update, &mut tape),
        Err(param_adjoint::Error::NotOnTape)
    ));

    let id = m.block_variable(&mut tape);
    assert_eq!(m.original_block_variable(), Some(id));
    m.adj_update_value(&update, &mut tape).unwrap();
    assert_eq!(
        tape.variable(id).unwrap().checkpoint().unwrap().values(),
        &dyn1(&[5.0])
    );
}
