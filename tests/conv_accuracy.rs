// Direct convolution accuracy - blocked engine vs the plain reference
use blockconv::reference::conv_ref;
use blockconv::reorder::{reorder_from_nchw, reorder_to_nchw, reorder_weights_blocked};
use blockconv::kernels::SimdLevel;
use blockconv::{
    Activation, Algorithm, ConvDesc, ConvError, ConvParams, DataType, DirectConv, Element, Format, PackState,
    WeightFormat,
};

fn assert_close(a: &[f32], b: &[f32], tol: f32, name: &str) {
    assert_eq!(a.len(), b.len(), "{}: length mismatch", name);
    let max_diff = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs() / y.abs().max(1.0))
        .fold(0.0f32, f32::max);

    if max_diff > tol || max_diff.is_nan() {
        println!("{} FAILED: max rel diff = {:.6e} (tol = {:.6e})", name, max_diff, tol);
        println!("Got:      {:?}", &a[..5.min(a.len())]);
        println!("Expected: {:?}", &b[..5.min(b.len())]);
        panic!("{} failed accuracy check", name);
    }
    println!("{} PASSED: max rel diff = {:.6e}", name, max_diff);
}

/// Deterministic values in [-1, 1).
fn pseudo(len: usize, seed: u64) -> Vec<f32> {
    let mut s = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            s ^= s << 13;
            s ^= s >> 7;
            s ^= s << 17;
            (s >> 40) as f32 / (1u64 << 23) as f32 - 1.0
        })
        .collect()
}

/// Small integers, so every partial sum is exact in f32.
fn integers(len: usize, seed: u64) -> Vec<f32> {
    pseudo(len, seed).into_iter().map(|x| (x * 4.0).round()).collect()
}

struct Problem {
    input: Vec<f32>,
    weights: Vec<f32>,
    bias: Vec<f32>,
}

impl Problem {
    fn new(p: &ConvParams, seed: u64) -> Self {
        Self {
            input: pseudo(p.n * p.g * p.ic * p.ih * p.iw, seed),
            weights: pseudo(p.g * p.oc * p.ic * p.kh * p.kw, seed + 1),
            bias: pseudo(p.g * p.oc, seed + 2),
        }
    }

    fn reference(&self, p: &ConvParams) -> Vec<f32> {
        conv_ref(p, &self.input, &self.weights, p.with_bias.then_some(self.bias.as_slice()))
    }
}

fn raw_weights(p: &ConvParams, oihw: &[f32]) -> Vec<f32> {
    match p.weights_format {
        WeightFormat::Oihw => oihw.to_vec(),
        WeightFormat::Blocked => reorder_weights_blocked(oihw, &p.weight_layout()),
    }
}

/// Runs the engine on plain tensors and returns the plain output.
fn run<O: Element>(conv: &mut DirectConv<O>, prob: &Problem) -> Vec<f32> {
    let p = conv.params().clone();
    let input = reorder_from_nchw(&prob.input, &p.input_layout());
    let weights = raw_weights(&p, &prob.weights);
    let mut output = vec![O::default(); p.output_layout().len()];
    conv.execute(&mut output, &input, &weights, p.with_bias.then_some(prob.bias.as_slice()))
        .unwrap();
    reorder_to_nchw(&output, &p.output_layout())
}

#[test]
fn test_blocked_16ch_matches_reference_exactly() {
    let p = ConvDesc::new(1, 16, 16, (4, 4), (3, 3))
        .pads(1, 1, 1, 1)
        .vector_width(16)
        .formats(Format::Blocked, Format::Blocked)
        .setup()
        .unwrap();
    assert_eq!(p.ir, 16);
    let prob = Problem {
        input: integers(16 * 16, 1),
        weights: integers(16 * 16 * 9, 2),
        bias: vec![0.0; 16],
    };
    let mut conv = DirectConv::<f32>::new(p.clone()).unwrap();
    let got = run(&mut conv, &prob);
    assert_eq!(got, prob.reference(&p));
}

#[test]
fn test_remainder_input_ignores_padded_lanes() {
    let p = ConvDesc::new(1, 20, 16, (5, 5), (3, 3))
        .pads(1, 1, 1, 1)
        .vector_width(16)
        .setup()
        .unwrap();
    assert_eq!((p.ib, p.ir), (2, 4));
    let prob = Problem::new(&p, 7);
    let layout = p.input_layout();
    let mut input = reorder_from_nchw(&prob.input, &layout);
    // Fill lanes 4..16 of the last input block with garbage.
    for y in 0..p.ih {
        for x in 0..p.iw {
            let base = layout.offset(0, 0, 1, y, x);
            for lane in 4..16 {
                input[base + lane] = f32::NAN;
            }
        }
    }
    let mut conv = DirectConv::<f32>::new(p.clone()).unwrap();
    let mut output = vec![f32::NAN; p.output_layout().len()];
    conv.execute(&mut output, &input, &prob.weights, Some(prob.bias.as_slice())).unwrap();
    assert!(output.iter().all(|v| v.is_finite()));
    assert_close(&reorder_to_nchw(&output, &p.output_layout()), &prob.reference(&p), 1e-5, "remainder_ic20");
}

#[test]
fn test_every_remainder_width() {
    let v = 8;
    for r in 1..=v {
        let p = ConvDesc::new(1, v + r, r, (3, 4), (3, 3))
            .pads(1, 1, 1, 1)
            .vector_width(v)
            .tile_width(3)
            .setup()
            .unwrap();
        assert_eq!((p.ir, p.or), (r, r));
        let prob = Problem::new(&p, r as u64);
        let input = reorder_from_nchw(&prob.input, &p.input_layout());
        let out_len = p.output_layout().len();
        // Guard region past the declared output size.
        let mut buffer = vec![-7.0f32; out_len + 64];
        let mut conv = DirectConv::<f32>::new(p.clone()).unwrap();
        conv.execute(&mut buffer[..out_len], &input, &prob.weights, Some(prob.bias.as_slice()))
            .unwrap();
        assert!(buffer[out_len..].iter().all(|&g| g == -7.0), "r={} wrote past the tensor", r);
        // Padded output lanes are zero.
        let layout = p.output_layout();
        for y in 0..p.oh {
            for x in 0..p.ow {
                let base = layout.offset(0, 0, 0, y, x);
                assert!(buffer[base + r..base + v].iter().all(|&z| z == 0.0), "r={}", r);
            }
        }
        assert_close(
            &reorder_to_nchw(&buffer[..out_len], &layout),
            &prob.reference(&p),
            1e-5,
            &format!("remainder_{}", r),
        );
    }
}

#[test]
fn test_format_combinations() {
    let inputs = [Format::Blocked, Format::ChannelLast, Format::ChannelFirst];
    let outputs = [Format::Blocked, Format::ChannelLast];
    for (k, &fi) in inputs.iter().enumerate() {
        for &fo in &outputs {
            let p = ConvDesc::new(2, 12, 10, (7, 6), (3, 3))
                .groups(2)
                .pads(1, 0, 1, 2)
                .strides(2, 1)
                .vector_width(8)
                .formats(fi, fo)
                .tile_width(4)
                .threads(3)
                .setup()
                .unwrap();
            let prob = Problem::new(&p, 11 + k as u64);
            let mut conv = DirectConv::<f32>::new(p.clone()).unwrap();
            let got = run(&mut conv, &prob);
            let tol = if fi == Format::Blocked && fo == Format::Blocked { 1e-5 } else { 5e-6 };
            assert_close(&got, &prob.reference(&p), tol, &format!("{:?}->{:?}", fi, fo));
        }
    }
}

#[test]
fn test_blocked_weights_and_relu6() {
    let p = ConvDesc::new(1, 16, 24, (6, 6), (3, 3))
        .pads(1, 1, 1, 1)
        .vector_width(8)
        .weights_format(WeightFormat::Blocked)
        .activation(Activation::relu6())
        .setup()
        .unwrap();
    let mut prob = Problem::new(&p, 21);
    prob.input.iter_mut().for_each(|x| *x *= 8.0);
    let mut conv = DirectConv::<f32>::new(p.clone()).unwrap();
    let got = run(&mut conv, &prob);
    assert!(got.iter().all(|&x| (0.0..=6.0).contains(&x)));
    assert!(got.iter().any(|&x| x == 6.0) && got.iter().any(|&x| x == 0.0));
    assert_close(&got, &prob.reference(&p), 1e-5, "relu6");
}

#[test]
fn test_gemm1x1_matches_direct() {
    for format in [Format::Blocked, Format::ChannelLast] {
        let desc = ConvDesc::new(2, 40, 24, (5, 7), (1, 1))
            .vector_width(8)
            .formats(format, format)
            .tile_width(6);
        let p_gemm = desc.clone().algorithm(Algorithm::Gemm1x1).setup().unwrap();
        let p_direct = desc.algorithm(Algorithm::Direct).setup().unwrap();
        assert_eq!((p_gemm.ht, p_gemm.wt), (1, 6));
        let prob = Problem::new(&p_gemm, 31);
        let gemm = run(&mut DirectConv::<f32>::new(p_gemm.clone()).unwrap(), &prob);
        let direct = run(&mut DirectConv::<f32>::new(p_direct).unwrap(), &prob);
        assert_close(&gemm, &prob.reference(&p_gemm), 1e-5, "gemm1x1");
        assert_close(&gemm, &direct, 1e-5, "gemm1x1_vs_direct");
    }
}

#[test]
fn test_f16_output() {
    let p = ConvDesc::new(1, 16, 16, (5, 5), (3, 3))
        .pads(1, 1, 1, 1)
        .output_type(DataType::F16)
        .setup()
        .unwrap();
    let prob = Problem::new(&p, 41);
    let mut conv = DirectConv::<half::f16>::new(p.clone()).unwrap();
    let got = run(&mut conv, &prob);
    assert_close(&got, &prob.reference(&p), 2e-3, "f16_output");
}

#[test]
fn test_scalar_and_simd_kernels_agree() {
    let p = ConvDesc::new(1, 32, 32, (6, 9), (3, 3))
        .pads(1, 1, 1, 1)
        .tile_width(4)
        .setup()
        .unwrap();
    let prob = Problem::new(&p, 51);
    let scalar = run(&mut DirectConv::<f32>::with_simd(p.clone(), SimdLevel::Scalar).unwrap(), &prob);
    let native = run(&mut DirectConv::<f32>::new(p.clone()).unwrap(), &prob);
    assert_close(&native, &scalar, 1e-5, "simd_vs_scalar");
}

#[test]
fn test_thread_count_does_not_change_output() {
    let desc = ConvDesc::new(2, 24, 16, (8, 8), (3, 3)).pads(1, 1, 1, 1).vector_width(8);
    let p1 = desc.clone().threads(1).setup().unwrap();
    let p4 = desc.threads(4).setup().unwrap();
    let prob = Problem::new(&p1, 61);
    let a = run(&mut DirectConv::<f32>::new(p1).unwrap(), &prob);
    let b = run(&mut DirectConv::<f32>::new(p4).unwrap(), &prob);
    assert_eq!(a, b);
}

#[test]
fn test_weights_packed_once_with_inference_acc() {
    let p = ConvDesc::new(1, 16, 16, (4, 4), (3, 3))
        .pads(1, 1, 1, 1)
        .inference_acc(true)
        .setup()
        .unwrap();
    let prob = Problem::new(&p, 71);
    let mut conv = DirectConv::<f32>::new(p.clone()).unwrap();
    assert_eq!(conv.pack_state(), PackState::Unpacked);
    let first = run(&mut conv, &prob);
    assert_eq!(conv.pack_state(), PackState::Packed);

    // Later calls reuse the packed copy.
    let input = reorder_from_nchw(&prob.input, &p.input_layout());
    let mut output = vec![0.0f32; p.output_layout().len()];
    let garbage = vec![99.0; prob.weights.len()];
    conv.execute(&mut output, &input, &garbage, Some(prob.bias.as_slice())).unwrap();
    assert_eq!(reorder_to_nchw(&output, &p.output_layout()), first);

    let stats = conv.stats().snapshot();
    assert_eq!((stats.executions, stats.weight_packs), (2, 1));
    conv.stats().report("inference_acc");
}

#[test]
fn test_invalidated_weights_repack_under_inference_acc() {
    let p = ConvDesc::new(1, 16, 16, (4, 4), (3, 3))
        .pads(1, 1, 1, 1)
        .inference_acc(true)
        .setup()
        .unwrap();
    let mut prob = Problem::new(&p, 75);
    let mut conv = DirectConv::<f32>::new(p.clone()).unwrap();
    run(&mut conv, &prob);
    assert_eq!(conv.pack_state(), PackState::Packed);

    conv.invalidate_weights();
    assert_eq!(conv.pack_state(), PackState::Unpacked);
    prob.weights.iter_mut().for_each(|w| *w *= 0.5);
    let updated = run(&mut conv, &prob);
    assert_eq!(conv.pack_state(), PackState::Packed);
    assert_close(&updated, &prob.reference(&p), 1e-5, "invalidated");
    assert_eq!(conv.stats().snapshot().weight_packs, 2);
}

#[test]
fn test_weights_repacked_without_inference_acc() {
    let p = ConvDesc::new(1, 8, 8, (3, 3), (1, 1))
        .vector_width(8)
        .inference_acc(false)
        .setup()
        .unwrap();
    let mut prob = Problem::new(&p, 81);
    let mut conv = DirectConv::<f32>::new(p.clone()).unwrap();
    run(&mut conv, &prob);
    prob.weights.iter_mut().for_each(|w| *w *= -1.0);
    let second = run(&mut conv, &prob);
    assert_close(&second, &prob.reference(&p), 1e-5, "repacked");
    assert_eq!(conv.stats().snapshot().weight_packs, 2);
}

#[test]
fn test_construction_errors() {
    let f16_params = ConvDesc::new(1, 16, 16, (4, 4), (3, 3))
        .output_type(DataType::F16)
        .setup()
        .unwrap();
    assert!(matches!(
        DirectConv::<f32>::new(f16_params),
        Err(ConvError::UnsupportedDataType { .. })
    ));
    assert!(matches!(
        ConvDesc::new(1, 16, 16, (4, 4), (3, 3))
            .formats(Format::ChannelLast, Format::ChannelFirst)
            .setup(),
        Err(ConvError::UnsupportedFormat { .. })
    ));
    assert!(matches!(
        ConvDesc::new(1, 16, 16, (4, 40), (3, 3)).tile_width(17).setup(),
        Err(ConvError::UnsupportedTile { width: 17, max: 16 })
    ));
    assert!(matches!(
        ConvDesc::new(1, 16, 16, (4, 4), (3, 3)).algorithm(Algorithm::Gemm1x1).setup(),
        Err(ConvError::InvalidDimension(_))
    ));
    for (lower, upper) in [(6.0, 0.0), (f32::NAN, 6.0), (0.0, f32::NAN)] {
        assert!(matches!(
            ConvDesc::new(1, 16, 16, (4, 4), (3, 3))
                .activation(Activation::bounded(lower, upper))
                .setup(),
            Err(ConvError::InvalidDimension(_))
        ));
    }
}

#[test]
fn test_execute_rejects_bad_buffers() {
    let p = ConvDesc::new(1, 16, 16, (4, 4), (3, 3)).pads(1, 1, 1, 1).setup().unwrap();
    let mut conv = DirectConv::<f32>::new(p.clone()).unwrap();
    let input = vec![0.0; p.input_layout().len()];
    let weights = vec![0.0; p.weight_layout().len()];
    let bias = vec![0.0; 16];
    let mut output = vec![0.0; p.output_layout().len()];
    assert!(matches!(
        conv.execute(&mut output, &input[1..], &weights, Some(bias.as_slice())),
        Err(ConvError::BufferSize { what: "input", .. })
    ));
    assert!(matches!(
        conv.execute(&mut output, &input, &weights, Some(&bias[..8])),
        Err(ConvError::BufferSize { what: "bias", .. })
    ));
    assert!(matches!(
        conv.execute(&mut output, &input, &weights, None),
        Err(ConvError::InvalidDimension(_))
    ));
    assert_eq!(conv.pack_state(), PackState::Unpacked);
    assert_eq!(conv.stats().snapshot().executions, 0);
}
