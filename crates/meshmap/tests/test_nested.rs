use ndarray::{ArrayD, IxDyn};
use pretty_assertions::assert_eq;

use meshmap::{Array, AxisSpec, DataType, Error, LoweringStrategy, Tracer, Xmap, mesh, vmap, xmap};

const I: usize = 11;
const V: usize = 7;
const K: usize = 13;

fn x_value(i: usize, v: usize, k: usize) -> f64 {
    ((3 * i + 5 * v + k) % 7) as f64 - 3.0
}

fn y_value(k: usize) -> f64 {
    (k % 4) as f64 + 1.0
}

/// Lays out `x[i, v, k]` so that dimension `order[d]` of the logical value is stored at dimension `d`.
fn layout(order: [usize; 3]) -> Array {
    let sizes = [I, V, K];
    let shape = order.map(|logical| sizes[logical]);
    let data = ArrayD::from_shape_fn(IxDyn(&shape), |index| {
        let mut logical = [0; 3];
        for (dimension, axis) in order.iter().enumerate() {
            logical[*axis] = index[dimension];
        }
        x_value(logical[0], logical[1], logical[2])
    });
    Array::from_ndarray(DataType::Float32, data)
}

/// Order of the `(i, v, k)` axes when `first` is placed at `first_position` of the full value and `second` at
/// `second_position` of what remains.
fn order(first: usize, first_position: usize, second: usize, second_position: usize) -> [usize; 3] {
    let third = 3 - first - second;
    let mut remaining = vec![third];
    remaining.insert(second_position, second);
    remaining.insert(first_position, first);
    [remaining[0], remaining[1], remaining[2]]
}

fn expected(i_first: bool) -> Vec<f64> {
    let z = |i: usize, v: usize| (0..K).map(|k| x_value(i, v, k) * y_value(k)).sum::<f64>();
    if i_first {
        (0..I).flat_map(|i| (0..V).map(move |v| z(i, v))).collect()
    } else {
        (0..V).flat_map(|v| (0..I).map(move |i| z(i, v))).collect()
    }
}

fn contract(vmap_position: usize) -> Xmap {
    vmap(|inputs| Ok(vec![inputs[0].mul(&inputs[1])?.sum(&[0])?]), vec![Some(vmap_position), None], 0).unwrap()
}

#[test]
fn test_vmap_inside_xmap() {
    let y = Array::from_ndarray(DataType::Float32, ArrayD::from_shape_fn(IxDyn(&[K]), |index| y_value(index[0])));
    for i_position in 0..3 {
        for v_position in 0..2 {
            for out_position in 0..2 {
                let inner = contract(v_position);
                let f = xmap(move |inputs| inner.trace(&[&inputs[0], &inputs[1]]))
                    .in_axes(vec![AxisSpec::positional([(i_position as isize, "i")]), AxisSpec::empty()])
                    .out_axes(vec![AxisSpec::positional([(out_position as isize, "i")])])
                    .build()
                    .unwrap();
                let x = layout(order(0, i_position, 1, v_position));
                let output = f.call(&[&x, &y]).unwrap().remove(0);
                let shape = if out_position == 0 { [I, V] } else { [V, I] };
                assert_eq!(output.shape(), &shape, "i at {i_position}, v at {v_position}, out at {out_position}");
                assert_eq!(output.to_vec().unwrap(), expected(out_position == 0));
            }
        }
    }
}

#[test]
fn test_xmap_inside_vmap() {
    let y = Array::from_ndarray(DataType::Float32, ArrayD::from_shape_fn(IxDyn(&[K]), |index| y_value(index[0])));
    for v_position in 0..3 {
        for i_position in 0..2 {
            for out_position in 0..2 {
                let inner = xmap(|inputs| Ok(vec![inputs[0].mul(&inputs[1])?.sum(&[0])?]))
                    .in_axes(vec![AxisSpec::positional([(i_position as isize, "i")]), AxisSpec::empty()])
                    .out_axes(vec![AxisSpec::leading(["i"])])
                    .build()
                    .unwrap();
                let body = move |inputs: &[Tracer]| inner.trace(&[&inputs[0], &inputs[1]]);
                let f = vmap(body, vec![Some(v_position), None], out_position).unwrap();
                let x = layout(order(1, v_position, 0, i_position));
                let output = f.call(&[&x, &y]).unwrap().remove(0);
                let shape = if out_position == 0 { [V, I] } else { [I, V] };
                assert_eq!(output.shape(), &shape, "v at {v_position}, i at {i_position}, out at {out_position}");
                assert_eq!(output.to_vec().unwrap(), expected(out_position == 1));
            }
        }
    }
}

// Every way of wrapping an inner xmap of `nk,km->nm` in an outer map over `v`. The inner map binds `x` and `y` on
// either operand, and the outer map is either a vmap or an xmap.

const LETTERS: [char; 6] = ['n', 'k', 'm', 'x', 'y', 'v'];

/// Two-axis cases are sampled with this stride. It is prime, so every inner and outer placement is still visited.
const TWO_AXIS_STRIDE: usize = 211;

fn letter_size(letter: char) -> usize {
    match letter {
        'n' => 2,
        'k' => 3,
        'm' => 5,
        'x' => 11,
        'y' => 13,
        _ => 7,
    }
}

fn slot(letter: char) -> usize {
    LETTERS.iter().position(|candidate| *candidate == letter).unwrap()
}

fn lhs_value(index: &[usize; 6]) -> f64 {
    ((3 * index[0] + 5 * index[1] + 7 * index[3] + 2 * index[4] + 4 * index[5]) % 9) as f64 - 4.0
}

fn rhs_value(index: &[usize; 6]) -> f64 {
    ((2 * index[1] + 3 * index[2] + 5 * index[3] + 7 * index[4] + 11 * index[5]) % 7) as f64 - 3.0
}

/// Keeps only the coordinates of `letters`, zeroing the rest.
fn restrict(index: &[usize; 6], letters: &[char]) -> [usize; 6] {
    let mut restricted = [0; 6];
    for letter in letters {
        restricted[slot(*letter)] = index[slot(*letter)];
    }
    restricted
}

fn tensor<F: Fn(&[usize; 6]) -> f64>(letters: &[char], value: F) -> ArrayD<f64> {
    let shape = letters.iter().map(|letter| letter_size(*letter)).collect::<Vec<_>>();
    ArrayD::from_shape_fn(IxDyn(&shape), |position| {
        let mut index = [0; 6];
        for (dimension, letter) in letters.iter().enumerate() {
            index[slot(*letter)] = position[dimension];
        }
        value(&index)
    })
}

fn insert_axes(letters: &mut Vec<char>, axes: &[(usize, char)]) {
    let mut axes = axes.to_vec();
    axes.sort();
    for (position, letter) in axes {
        letters.insert(position, letter);
    }
}

#[derive(Clone, Debug)]
struct NestedCase {
    inner_in_axes: [Vec<(usize, char)>; 2],
    inner_out_axes: Vec<(usize, char)>,
    outer_in_axes: [Option<usize>; 2],
    outer_out_axis: usize,
    outer_as_xmap: bool,
}

impl NestedCase {
    fn letters(&self) -> [Vec<char>; 3] {
        let mut lhs = vec!['n', 'k'];
        let mut rhs = vec!['k', 'm'];
        let mut out = vec!['n', 'm'];
        insert_axes(&mut lhs, &self.inner_in_axes[0]);
        insert_axes(&mut rhs, &self.inner_in_axes[1]);
        insert_axes(&mut out, &self.inner_out_axes);
        for (letters, position) in [&mut lhs, &mut rhs].into_iter().zip(self.outer_in_axes) {
            if let Some(position) = position {
                letters.insert(position, 'v');
            }
        }
        out.insert(self.outer_out_axis, 'v');
        [lhs, rhs, out]
    }

    fn function(&self) -> Xmap {
        let inner_spec = |axes: &[(usize, char)]| {
            AxisSpec::positional(axes.iter().map(|(position, letter)| (*position as isize, letter.to_string())))
        };
        let inner = xmap(|inputs| Ok(vec![inputs[0].dot_general(&inputs[1], (&[1], &[0]), (&[], &[]))?]))
            .in_axes(vec![inner_spec(&self.inner_in_axes[0]), inner_spec(&self.inner_in_axes[1])])
            .out_axes(vec![inner_spec(&self.inner_out_axes)])
            .build()
            .unwrap();
        let body = move |inputs: &[Tracer]| inner.trace(&[&inputs[0], &inputs[1]]);
        if self.outer_as_xmap {
            let outer_spec = |position: Option<usize>| match position {
                Some(position) => AxisSpec::positional([(position as isize, "v")]),
                None => AxisSpec::empty(),
            };
            xmap(body)
                .in_axes(vec![outer_spec(self.outer_in_axes[0]), outer_spec(self.outer_in_axes[1])])
                .out_axes(vec![AxisSpec::positional([(self.outer_out_axis as isize, "v")])])
                .build()
                .unwrap()
        } else {
            vmap(body, self.outer_in_axes.to_vec(), self.outer_out_axis).unwrap()
        }
    }

    fn check(&self) {
        let [lhs, rhs, out] = self.letters();
        let x = Array::from_ndarray(DataType::Float32, tensor(&lhs, lhs_value));
        let y = Array::from_ndarray(DataType::Float32, tensor(&rhs, rhs_value));
        let output = self.function().call(&[&x, &y]).unwrap_or_else(|error| panic!("{self:?}: {error}")).remove(0);
        let expected = tensor(&out, |index| {
            (0..letter_size('k'))
                .map(|k| {
                    let mut index = *index;
                    index[slot('k')] = k;
                    lhs_value(&restrict(&index, &lhs)) * rhs_value(&restrict(&index, &rhs))
                })
                .sum()
        });
        assert_eq!(output.to_ndarray().unwrap(), expected, "{self:?}");
    }
}

/// Ordered selections of `count` distinct entries of `values`, in lexicographic order.
fn arrangements(values: &[usize], count: usize) -> Vec<Vec<usize>> {
    if count == 0 {
        return vec![Vec::new()];
    }
    let mut result = Vec::new();
    for first in values {
        let rest = values.iter().copied().filter(|value| value != first).collect::<Vec<_>>();
        for mut tail in arrangements(&rest, count - 1) {
            tail.insert(0, *first);
            result.push(tail);
        }
    }
    result
}

/// Enumerates the cases whose inner map binds `inner_axis_count` axes, keeping every `stride`-th one. Also returns
/// the number of enumerated cases.
fn nested_cases(inner_axis_count: usize, stride: usize) -> (usize, Vec<NestedCase>) {
    let mut inner_in_choices = vec![Vec::new()];
    inner_in_choices.extend((0..3).map(|i| vec![(i, 'x')]));
    for i in 0..4 {
        for j in (0..4).filter(|j| *j != i) {
            inner_in_choices.push(vec![(i, 'x'), (j, 'y')]);
        }
    }

    let mut count = 0;
    let mut cases = Vec::new();
    for lhs_in in &inner_in_choices {
        for rhs_in in &inner_in_choices {
            let mut names = lhs_in.iter().chain(rhs_in).map(|(_, letter)| *letter).collect::<Vec<_>>();
            names.sort();
            names.dedup();
            if names.len() != inner_axis_count {
                continue;
            }
            let out_positions = (0..2 + names.len()).collect::<Vec<_>>();
            for positions in arrangements(&out_positions, names.len()) {
                let inner_out_axes = positions.into_iter().zip(names.iter().copied()).collect::<Vec<_>>();
                for lhs_outer in (0..2 + lhs_in.len()).map(Some).chain([None]) {
                    for rhs_outer in (0..2 + rhs_in.len()).map(Some).chain([None]) {
                        if lhs_outer.is_none() && rhs_outer.is_none() {
                            continue;
                        }
                        for outer_out_axis in 0..2 + names.len() {
                            for outer_as_xmap in [false, true] {
                                if count % stride == 0 {
                                    cases.push(NestedCase {
                                        inner_in_axes: [lhs_in.clone(), rhs_in.clone()],
                                        inner_out_axes: inner_out_axes.clone(),
                                        outer_in_axes: [lhs_outer, rhs_outer],
                                        outer_out_axis,
                                        outer_as_xmap,
                                    });
                                }
                                count += 1;
                            }
                        }
                    }
                }
            }
        }
    }
    (count, cases)
}

#[test]
fn test_nested_map_cases_without_inner_axes() {
    let (count, cases) = nested_cases(0, 1);
    assert_eq!(count, 32);
    for case in &cases {
        case.check();
    }
}

#[test]
fn test_nested_map_cases_with_one_inner_axis() {
    let (count, cases) = nested_cases(1, 1);
    assert_eq!(count, 3618);
    for case in &cases {
        case.check();
    }
}

#[test]
fn test_nested_map_cases_with_two_inner_axes() {
    let (count, cases) = nested_cases(2, TWO_AXIS_STRIDE);
    assert_eq!(count, 495360);
    assert!(cases.iter().any(|case| case.outer_as_xmap) && cases.iter().any(|case| !case.outer_as_xmap));
    for case in &cases {
        case.check();
    }
}

#[test]
fn test_nested_xmap_over_mesh() {
    let _mesh = mesh(&[("x", 2), ("y", 2)]).unwrap();
    let inner = xmap(|inputs| Ok(vec![inputs[0].psum(&["a", "b"])?]))
        .in_axes(vec![AxisSpec::leading(["b"])])
        .out_axes(vec![AxisSpec::empty()])
        .axis_resource("b", ["y"])
        .lowering_strategy(LoweringStrategy::Sharded)
        .build()
        .unwrap();
    let f = xmap(move |inputs| inner.trace(&[&inputs[0]]))
        .in_axes(vec![AxisSpec::leading(["a"])])
        .out_axes(vec![AxisSpec::empty()])
        .axis_resource("a", ["x"])
        .lowering_strategy(LoweringStrategy::Sharded)
        .build()
        .unwrap();
    let output = f.call(&[&Array::arange(DataType::Float32, &[4, 6])]).unwrap().remove(0);
    assert_eq!(output.to_vec().unwrap(), vec![276.0]);
}

#[test]
fn test_nested_xmap_keeps_outer_axes() {
    let inner = xmap(|inputs| Ok(vec![inputs[0].scale(2.0)?]))
        .in_axes(vec![AxisSpec::leading(["b"])])
        .out_axes(vec![AxisSpec::positional([(1, "b")])])
        .build()
        .unwrap();
    let f = xmap(move |inputs| inner.trace(&[&inputs[0]]))
        .in_axes(vec![AxisSpec::positional([(1, "a")])])
        .out_axes(vec![AxisSpec::leading(["a"])])
        .build()
        .unwrap();
    // The outer function maps dimension 1 of a [3, 2, 4] value, so the inner one sees [3, 4] per element.
    let output = f.call(&[&Array::arange(DataType::Float32, &[3, 2, 4])]).unwrap().remove(0);
    assert_eq!(output.shape(), &[2, 4, 3]);
    let input = Array::arange(DataType::Float32, &[3, 2, 4]).to_ndarray().unwrap();
    let expected = ArrayD::from_shape_fn(IxDyn(&[2, 4, 3]), |index| 2.0 * input[[index[2], index[0], index[1]]]);
    assert_eq!(output.to_ndarray().unwrap(), expected);
}

#[test]
fn test_nested_xmap_resource_errors() {
    let _mesh = mesh(&[("x", 2), ("y", 2)]).unwrap();
    let outer = |inner: Xmap| {
        xmap(move |inputs| inner.trace(&[&inputs[0]]))
            .in_axes(vec![AxisSpec::leading(["a"])])
            .out_axes(vec![AxisSpec::empty()])
            .axis_resource("a", ["x"])
            .build()
            .unwrap()
    };
    let input = Array::arange(DataType::Float32, &[4, 6]);

    let reused = xmap(|inputs| Ok(vec![inputs[0].psum(&["a", "b"])?]))
        .in_axes(vec![AxisSpec::leading(["b"])])
        .out_axes(vec![AxisSpec::empty()])
        .axis_resource("b", ["x"])
        .build()
        .unwrap();
    assert_eq!(
        outer(reused).call(&[&input]).unwrap_err().to_string(),
        "Resource x is already assigned to axis a, so it cannot also be used by axis b",
    );

    let shadowing = xmap(|inputs| Ok(vec![inputs[0].psum(&["a"])?]))
        .in_axes(vec![AxisSpec::leading(["a"])])
        .out_axes(vec![AxisSpec::empty()])
        .build()
        .unwrap();
    assert_eq!(outer(shadowing).call(&[&input]).unwrap_err(), Error::AxisNameConflict { axis: "a".to_string() });
}

#[test]
fn test_nested_xmap_rejects_changed_mesh() {
    let _mesh = mesh(&[("x", 2)]).unwrap();
    let inner = xmap(|inputs| Ok(vec![inputs[0].psum(&["b"])?]))
        .in_axes(vec![AxisSpec::leading(["b"])])
        .out_axes(vec![AxisSpec::empty()])
        .build()
        .unwrap();
    let f = xmap(move |inputs| {
        let _inner_mesh = mesh(&[("z", 4)])?;
        inner.trace(&[&inputs[0]])
    })
    .in_axes(vec![AxisSpec::leading(["a"])])
    .out_axes(vec![AxisSpec::leading(["a"])])
    .axis_resource("a", ["x"])
    .build()
    .unwrap();
    assert_eq!(f.call(&[&Array::arange(DataType::Float32, &[2, 3])]).unwrap_err(), Error::ResourceEnvironmentChanged);
}

#[test]
fn test_tracing_outside_of_xmap_fails() {
    let inner = xmap(|inputs| Ok(vec![inputs[0].clone()]))
        .in_axes(vec![AxisSpec::leading(["a"])])
        .out_axes(vec![AxisSpec::leading(["a"])])
        .build()
        .unwrap();
    assert_eq!(inner.trace(&[]).unwrap_err(), Error::NoActiveTrace { op: "xmap".to_string() });
}
