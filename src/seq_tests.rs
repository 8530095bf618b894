//! Patch-level tests for the sequencer module

#[cfg(test)]
mod tests {
    use crate::test_framework::TestRunner;
    use std::time::Duration;

    // A 10 Hz clock pulses at samples 0, 4410, 8820, ... at 44.1 kHz, so
    // 19845 samples (0.45 s) hold exactly five pulses
    const FIVE_PULSES: usize = 19845;

    fn param(runner: &TestRunner, name: &str) -> f32 {
        runner
            .engine()
            .module_param("seq", name)
            .unwrap_or_else(|| panic!("seq has no parameter {name}"))
    }

    #[test]
    fn test_four_step_loop() {
        let mut runner = TestRunner::new().watching(["seq"]);

        let patch = r"
            clk: clock 10
            seq: seq 1 16 1
            seq.clock1 <- clk.gate
            seq.steps1 <- 4
            seq.value1_1 <- 1
            seq.value1_2 <- 2
            seq.value1_3 <- 3
            seq.value1_4 <- 4
        ";

        let result = runner.run_patch(patch, Duration::from_secs(1)).expect("patch should run");

        // The first pulse lands on sample 0 and moves straight to step 2
        let runs = result.runs("seq", "cv1");
        assert_eq!(&runs[..6], &[2.0, 3.0, 4.0, 1.0, 2.0, 3.0]);
        result.assert_gate_count("seq", "gate1_1", 10).unwrap();
        result.assert_signal_range("seq", "gate1_1", 0.0, 10.0).unwrap();
    }

    #[test]
    fn test_unpatched_rows_follow_the_row_above() {
        let mut runner = TestRunner::new().watching(["seq"]);

        let patch = r"
            clk: clock 10
            seq: seq 3 16 1
            seq.clock1 <- clk.gate
            seq.steps2 <- 2
        ";

        let result = runner.run_patch_samples(patch, FIVE_PULSES).expect("patch should run");

        assert!((param(&runner, "index1") - 5.0).abs() < f32::EPSILON);
        assert!((param(&runner, "index2") - 1.0).abs() < f32::EPSILON);
        assert!((param(&runner, "index3") - 5.0).abs() < f32::EPSILON);
        result.assert_gate_count("seq", "gate3_1", 5).unwrap();
    }

    #[test]
    fn test_first_row_without_clock_stays_put() {
        let mut runner = TestRunner::new().watching(["seq"]);

        let patch = r"
            clk: clock 10
            seq: seq 2 16 1
            seq.clock2 <- clk.gate
        ";

        let result = runner.run_patch_samples(patch, FIVE_PULSES).expect("patch should run");

        assert!(param(&runner, "index1").abs() < f32::EPSILON);
        assert!((param(&runner, "index2") - 5.0).abs() < f32::EPSILON);
        assert!(!result.collector.gate_fired("seq", "gate1_1"));
        result.assert_gate_fired("seq", "gate2_1").unwrap();
    }

    #[test]
    fn test_reset_overrides_advance() {
        let mut runner = TestRunner::new();

        // rst fires once, on the same sample as the first clock pulse
        let patch = r"
            clk: clock 10
            rst: clock 1
            seq: seq 1 16 1
            seq.clock1 <- clk.gate
            seq.reset <- rst.trig
        ";

        runner.run_patch_samples(patch, FIVE_PULSES).expect("patch should run");
        assert!((param(&runner, "index1") - 4.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_randomize_lines() {
        let mut runner = TestRunner::new();

        let patch = r"
            rnd: clock 1
            seq: seq 1 16 1
            seq.seed <- 7
            seq.rnd1 <- rnd.trig
            seq.grnd1_1 <- rnd.trig
        ";

        runner.run_patch_samples(patch, 64).expect("patch should run");

        let values: Vec<f32> = (1..=16).map(|s| param(&runner, &format!("value1_{s}"))).collect();
        assert!(values.iter().all(|v| (0.0..=10.0).contains(v)));
        assert!(values.iter().any(|&v| v > 0.0));

        let armed = (1..=16).filter(|s| param(&runner, &format!("gate1_{s}_1")) > 0.5).count();
        assert!(armed < 16, "a coin flip per step should disarm something");
    }

    #[test]
    fn test_unpatched_randomize_lines_do_nothing() {
        let mut runner = TestRunner::new();

        runner.run_patch_samples("seq: seq 1 8 1", 4410).expect("patch should run");

        for s in 1..=8 {
            assert!(param(&runner, &format!("value1_{s}")).abs() < f32::EPSILON);
            assert!((param(&runner, &format!("gate1_{s}_1")) - 1.0).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn test_press_silences_a_step() {
        let mut runner = TestRunner::new().watching(["seq"]);

        let patch = r"
            clk: clock 10
            seq: seq 1 16 1
            seq.clock1 <- clk.gate
            seq.steps1 <- 2
        ";
        runner.run_patch_samples(patch, 64).expect("patch should run");

        // Disarm step 1; the loop is now step 2 (armed), step 1 (silent)
        runner.engine().press("seq", 1, 1, 1).unwrap();
        let result = runner.continue_samples(FIVE_PULSES).unwrap();

        assert!(param(&runner, "gate1_1_1").abs() < f32::EPSILON);
        assert!(param(&runner, "button1_1_1").abs() < f32::EPSILON);
        let fired = result.gate_fire_count("seq", "gate1_1");
        assert!((2..=3).contains(&fired), "expected only step 2 to sound, got {fired} gates");
    }

    #[test]
    fn test_state_file_round_trip() {
        let mut runner = TestRunner::new();
        runner.run_patch_samples("seq: seq 2 4 2", 1).expect("patch should run");
        let engine = runner.engine();

        engine.press("seq", 2, 3, 2).unwrap();
        engine.process_for_test(1);
        assert!(param(&runner, "gate2_3_2").abs() < f32::EPSILON);

        let path = std::env::temp_dir().join(format!("zim_seq_state_{}.json", std::process::id()));
        engine.save_state_file("seq", &path).unwrap();

        engine.reset_module("seq").unwrap();
        assert!((param(&runner, "gate2_3_2") - 1.0).abs() < f32::EPSILON);

        engine.load_state_file("seq", &path).unwrap();
        assert!(param(&runner, "gate2_3_2").abs() < f32::EPSILON);
        assert!((param(&runner, "gate1_1_1") - 1.0).abs() < f32::EPSILON);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_describe_and_render() {
        let mut runner = TestRunner::new();
        let patch = r"
            clk: clock 10
            seq: seq 2 8 1
            seq.clock1 <- clk.gate
            out <- seq.gate1_1 * 0.1
        ";
        runner.run_patch_samples(patch, 1).expect("patch should run");
        let engine = runner.engine();

        // The pulse on sample 0 was already seen before the render started
        let report = engine.render(Duration::from_millis(450));
        assert!(report.samples.abs_diff(FIVE_PULSES) <= 1);
        assert_eq!(report.gate_counts.get("clk.gate"), Some(&4));
        assert_eq!(report.gate_counts.get("seq.gate1_1"), Some(&4));

        let grids = engine.describe_all();
        assert_eq!(grids.len(), 1);
        assert!(grids[0].1.contains("row 2"));
    }

    #[test]
    fn test_bundled_patches_load() {
        // random_walk re-rolls row 1 gates, so listen to the untouched row 2
        let patches = [("patches/basic.zim", "gate1_1"), ("patches/random_walk.zim", "gate2_1")];
        for (path, gate) in patches {
            let mut runner = TestRunner::new().watching(["seq"]);
            let result = runner
                .run_patch_file(path, Duration::from_secs(1))
                .unwrap_or_else(|e| panic!("{path}: {e}"));
            result.assert_gate_fired("seq", gate).unwrap();
            assert!(runner.engine().validate_connections().is_empty(), "{path}");
        }
    }
}
