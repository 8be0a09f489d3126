/// Posterior summaries of a vector of conjugate parameters
pub trait Inference {
    type Vec;

    /// E[x]
    fn posterior_mean(&self) -> Self::Vec;
    /// sqrt(Var[x])
    fn posterior_sd(&self) -> Self::Vec;
    /// E[ln x]
    fn posterior_log_mean(&self) -> Self::Vec;
    /// 1/E[x], e.g., the expected variance of a precision parameter
    fn posterior_mean_inverse(&self) -> Self::Vec;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A parameter vector with two types of statistics
/// with hyper parameters a0 and b0
pub trait TwoStatParam {
    type Vec;
    type Scalar;

    fn new(len: usize, a0: Self::Scalar, b0: Self::Scalar) -> Self;
    fn add_stat(&mut self, add_a: &Self::Vec, add_b: &Self::Vec);
    fn update_stat(&mut self, update_a: &Self::Vec, update_b: &Self::Vec);
    /// `a[i] = a0[i] + update_a[k]`, `b[i] = b0[i] + update_b[k]` for `i = idx[k]`
    fn update_stat_at(&mut self, idx: &[usize], update_a: &Self::Vec, update_b: &Self::Vec);
    fn reset_stat(&mut self);
}
