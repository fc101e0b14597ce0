pub fn up_div(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

pub fn up_round(a: usize, b: usize) -> usize {
    up_div(a, b) * b
}

pub fn ensure_capacity<T: Clone + Default>(v: &mut Vec<T>, len: usize) {
    if v.len() != len {
        v.clear();
        v.resize(len, T::default());
    }
}
