use super::*;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn spec(rate: f64, time_unit: Duration, pre_allocated: usize, max_workers: usize) -> ArrivalRateSpec {
    ArrivalRateSpec {
        rate,
        time_unit,
        duration: secs(60),
        pre_allocated,
        max_workers,
    }
}

#[test]
fn test_stage_ramp_validation() {
    assert_eq!(
        LoadProfile::stage_ramp(vec![]).unwrap_err(),
        InvalidProfile::EmptyStages
    );
    assert_eq!(
        LoadProfile::stage_ramp(vec![Stage::new(secs(1), 1), Stage::new(Duration::ZERO, 2)])
            .unwrap_err(),
        InvalidProfile::ZeroStageDuration { index: 1 }
    );
    // a single stage with target 0 is a valid no-op run
    let profile = LoadProfile::stage_ramp(vec![Stage::new(secs(1), 0)]).unwrap();
    assert_eq!(profile.max_workers(), 0);
    assert_eq!(profile.total_duration(), secs(1));
}

#[test]
fn test_arrival_rate_validation() {
    for (input, expected_err) in [
        (
            spec(10., secs(1), 10, 5),
            Some(InvalidProfile::PreAllocatedExceedsMax {
                pre_allocated: 10,
                max_workers: 5,
            }),
        ),
        (spec(0., secs(1), 1, 5), Some(InvalidProfile::NonPositiveRate(0.))),
        (spec(-1., secs(1), 1, 5), Some(InvalidProfile::NonPositiveRate(-1.))),
        (
            spec(f64::INFINITY, secs(1), 1, 5),
            Some(InvalidProfile::NonPositiveRate(f64::INFINITY)),
        ),
        (
            spec(1e-9, secs(1), 1, 5),
            Some(InvalidProfile::RateOutOfRange(1e-9)),
        ),
        (
            spec(2.5e-7, secs(1), 1, 5),
            Some(InvalidProfile::RateOutOfRange(2.5e-7)),
        ),
        (
            spec(1.000_000_4, secs(1), 1, 5),
            Some(InvalidProfile::RateTooPrecise(1.000_000_4)),
        ),
        (spec(0.000_001, secs(1), 0, 1), None),
        (spec(0.1, secs(1), 0, 1), None),
        (spec(33.333_333, secs(1), 0, 1), None),
        (spec(1., Duration::ZERO, 1, 5), Some(InvalidProfile::ZeroTimeUnit)),
        (spec(1., secs(1), 0, 0), Some(InvalidProfile::ZeroMaxWorkers)),
        (spec(0.5, secs(1), 0, 1), None),
        (spec(1000., secs(1), 5, 5), None),
    ] {
        match (LoadProfile::arrival_rate(input), expected_err) {
            (Ok(_), None) => (),
            (Err(err), Some(expected_err)) => assert_eq!(err, expected_err, "input: {input:?}"),
            (result, expected_err) => {
                panic!("input: {input:?}; unexpected result {result:?}, expected err: {expected_err:?}")
            }
        }
    }

    let mut zero_duration = spec(1., secs(1), 1, 1);
    zero_duration.duration = Duration::ZERO;
    assert_eq!(
        LoadProfile::arrival_rate(zero_duration).unwrap_err(),
        InvalidProfile::ZeroDuration
    );
}

#[test]
fn test_step_target_at_uses_half_open_intervals() {
    let ramp = StageRamp::try_new(
        vec![
            Stage::new(secs(5), 5),
            Stage::new(secs(10), 5),
            Stage::new(secs(5), 0),
        ],
        Interpolation::Step,
    )
    .unwrap();

    assert_eq!(ramp.total_duration(), secs(20));
    assert_eq!(ramp.peak_target(), 5);

    for (elapsed, expected) in [
        (Duration::ZERO, Some(5)),
        (Duration::from_millis(4_999), Some(5)),
        (secs(5), Some(5)),
        (secs(14), Some(5)),
        (Duration::from_millis(14_999), Some(5)),
        (secs(15), Some(0)),
        (secs(16), Some(0)),
        (Duration::from_millis(19_999), Some(0)),
        (secs(20), None),
        (secs(3600), None),
    ] {
        assert_eq!(ramp.target_at(elapsed), expected, "elapsed: {elapsed:?}");
    }
}

#[test]
fn test_step_target_boundary_takes_later_stage() {
    let ramp = StageRamp::try_new(
        vec![Stage::new(secs(1), 1), Stage::new(secs(1), 7)],
        Interpolation::Step,
    )
    .unwrap();
    assert_eq!(ramp.target_at(Duration::from_millis(999)), Some(1));
    assert_eq!(ramp.target_at(secs(1)), Some(7));
}

#[test]
fn test_linear_target_at() {
    let ramp = StageRamp::try_new(
        vec![Stage::new(secs(10), 10), Stage::new(secs(10), 0)],
        Interpolation::Linear,
    )
    .unwrap();

    for (elapsed, expected) in [
        (Duration::ZERO, Some(0)),
        (secs(5), Some(5)),
        (Duration::from_millis(9_999), Some(9)),
        (secs(10), Some(10)),
        (secs(15), Some(5)),
        (secs(20), None),
    ] {
        assert_eq!(ramp.target_at(elapsed), expected, "elapsed: {elapsed:?}");
    }
}

#[test]
fn test_arrival_schedule_has_no_drift() {
    for (rate, time_unit) in [
        (1000., secs(1)),
        (3., secs(1)),
        (7., Duration::from_millis(300)),
        (0.5, secs(1)),
        (1.25, Duration::from_millis(100)),
        (100_000., secs(1)),
    ] {
        let arrival = ArrivalRate::try_new(spec(rate, time_unit, 0, 1)).unwrap();
        let schedule = arrival.schedule();

        let mut previous = 0;
        let tick = Duration::from_millis(7);
        let mut elapsed = Duration::ZERO;
        while elapsed < time_unit * 20 {
            let due = schedule.due_at(elapsed);
            assert!(due >= previous, "rate {rate}: schedule must be monotonic");
            previous = due;
            elapsed += tick;
        }

        for n in [1u32, 2, 10, 20] {
            let expected = (rate * n as f64).floor() as u64;
            assert_eq!(
                schedule.due_at(time_unit * n),
                expected,
                "rate {rate} per {time_unit:?} over {n} units"
            );
        }
    }
}

#[test]
fn test_arrival_schedule_smallest_rate() {
    let schedule = ArrivalRate::try_new(spec(0.000_001, secs(1), 0, 1))
        .unwrap()
        .schedule();
    assert_eq!(schedule.due_at(secs(999_999)), 0);
    assert_eq!(schedule.due_at(secs(1_000_000)), 1);
}

#[test]
fn test_arrival_schedule_sub_tick_rates_accrue() {
    // 0.5 iterations per second, sampled every 100ms
    let schedule = ArrivalRate::try_new(spec(0.5, secs(1), 0, 1))
        .unwrap()
        .schedule();
    assert_eq!(schedule.due_at(Duration::from_millis(100)), 0);
    assert_eq!(schedule.due_at(Duration::from_millis(1_900)), 0);
    assert_eq!(schedule.due_at(secs(2)), 1);
    assert_eq!(schedule.due_at(Duration::from_millis(3_900)), 1);
    assert_eq!(schedule.due_at(secs(4)), 2);
}

#[test]
fn test_profile_from_json() {
    let profile = LoadProfile::from_json_str(
        r#"{
            "stages": [
                { "duration": "5s", "target": 5 },
                { "duration": "10s", "target": 5 },
                { "duration": "5s", "target": 0 }
            ]
        }"#,
    )
    .unwrap();
    assert_eq!(profile, ProfilePreset::RampUpDown.profile());

    let profile = LoadProfile::from_json_str(
        r#"{
            "arrivalRate": {
                "rate": 100000,
                "timeUnit": "1s",
                "duration": "5m",
                "preAllocatedVUs": 3,
                "maxVUs": 5
            }
        }"#,
    )
    .unwrap();
    assert_eq!(profile, ProfilePreset::ConstantArrivalRate.profile());

    let profile = LoadProfile::from_json_str(
        r#"{"arrivalRate": {"rate": 2, "duration": "1m_30s", "preAllocated": 0, "maxWorkers": 1}}"#,
    )
    .unwrap();
    let LoadProfile::ArrivalRate(arrival) = profile else {
        panic!("expected arrival rate profile");
    };
    assert_eq!(arrival.spec().time_unit, secs(1));
    assert_eq!(arrival.spec().duration, secs(90));
}

#[test]
fn test_profile_from_json_rejects_invalid_input() {
    for (input, expected) in [
        (r#"{"stages": []}"#, Some(InvalidProfile::EmptyStages)),
        (
            r#"{"stages": [{"duration": "0s", "target": 1}]}"#,
            Some(InvalidProfile::ZeroStageDuration { index: 0 }),
        ),
        (
            r#"{"arrivalRate": {"rate": 1, "duration": "1m", "preAllocated": 10, "maxWorkers": 5}}"#,
            Some(InvalidProfile::PreAllocatedExceedsMax {
                pre_allocated: 10,
                max_workers: 5,
            }),
        ),
        // everything below is malformed
        (r#"{}"#, None),
        (r#"{"stages": [{"duration": "5s", "target": -1}]}"#, None),
        (r#"{"stages": [{"duration": "soon", "target": 1}]}"#, None),
        (r#"{"stages": [{"duration": "5s", "target": 1, "foo": 1}]}"#, None),
        (
            r#"{"stages": [{"duration": "5s", "target": 1}], "arrivalRate": {"rate": 1, "duration": "1m", "preAllocated": 1, "maxWorkers": 1}}"#,
            None,
        ),
        (
            r#"{"interpolation": "linear", "arrivalRate": {"rate": 1, "duration": "1m", "preAllocated": 1, "maxWorkers": 1}}"#,
            None,
        ),
        ("not json", None),
    ] {
        let err = LoadProfile::from_json_str(input).unwrap_err();
        match expected {
            Some(expected) => assert_eq!(err, expected, "input: {input}"),
            None => assert!(
                matches!(err, InvalidProfile::Malformed(_)),
                "input: {input}; unexpected err: {err}"
            ),
        }
    }
}

#[test]
fn test_profile_json_roundtrip_of_presets() {
    for preset in ProfilePreset::ALL {
        let profile = preset.profile();
        let json = profile.to_json_string().unwrap();
        let parsed = LoadProfile::from_json_str(&json).unwrap();
        assert_eq!(profile, parsed, "preset: {preset}; json: {json}");
    }
}

#[test]
fn test_presets() {
    for preset in ProfilePreset::ALL {
        assert_eq!(preset.as_str().parse::<ProfilePreset>().unwrap(), preset);
    }
    assert!("nope".parse::<ProfilePreset>().is_err());

    let LoadProfile::StageRamp(ramp) = ProfilePreset::StepIncrement.profile() else {
        panic!("expected stage ramp");
    };
    assert_eq!(ramp.stages().len(), 10);
    assert_eq!(ramp.stages()[0], Stage::new(secs(30), 100));
    assert_eq!(ramp.stages()[9], Stage::new(secs(30), 1000));
    assert_eq!(ramp.total_duration(), Duration::from_mins(5));

    // the hand built schedule equals the validated one
    let LoadProfile::ArrivalRate(arrival) = ProfilePreset::ConstantArrivalRate.profile() else {
        panic!("expected arrival rate");
    };
    assert_eq!(Ok(arrival.clone()), ArrivalRate::try_new(*arrival.spec()));

    assert!(step_increment(secs(1), 10, 0).is_empty());
}
