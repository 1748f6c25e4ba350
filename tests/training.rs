mod common;

use std::io::Write;

use burn::data::dataset::Dataset as _;
use orientx::{
    datasets::{orientation, Sample},
    pipelines::text_classification::{
        checkpoint, evaluate, Adapter, Phase, Trainer, TrainingConfig,
    },
    Error,
};
use pretty_assertions::assert_eq;

use common::*;

fn config(num_epochs: usize) -> TrainingConfig {
    TrainingConfig::new()
        .with_num_epochs(num_epochs)
        .with_batch_size(4)
        .with_max_length(16)
        .with_learning_rate(5e-2)
}

#[test]
fn test_fit_runs_every_epoch_and_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model");
    let (train, valid) = split(8);

    let mut trainer = Trainer::new(config(4));
    let trained = trainer
        .fit(training_adapter(N_CLASSES), &train, &valid, &path, &mut ())
        .unwrap();

    assert_eq!(trainer.phase(), Phase::Done);
    assert_eq!(trained.history.len(), 4);
    assert_eq!(
        trained.history.iter().map(|s| s.epoch).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    assert!(checkpoint::file_path(&path).exists());

    let first = trained.history.first().unwrap().train_loss;
    let last = trained.history.last().unwrap().train_loss;
    assert!(last < first, "loss went from {} to {}", first, last);

    // 18 training rows in batches of 4 is 5 steps per epoch, 20 in total, and the last
    // step runs at 1/20 of the initial rate
    let rates: Vec<f64> = trained.history.iter().map(|s| s.learning_rate).collect();
    assert!(rates.windows(2).all(|pair| pair[1] < pair[0]));
    assert!((rates[3] - 5e-2 / 20.0).abs() < 1e-12);

    assert_eq!(trained.evaluation.report.support, valid.len());
}

#[test]
fn test_evaluate_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (train, valid) = split(6);

    let trained = Trainer::new(config(2))
        .fit(
            training_adapter(N_CLASSES),
            &train,
            &valid,
            &dir.path().join("model"),
            &mut (),
        )
        .unwrap();

    let first = evaluate(&trained.adapter, &valid, 3, 16).unwrap();
    let second = evaluate(&trained.adapter, &valid, 5, 16).unwrap();

    assert_eq!(first, second);
    assert!((0.0..=1.0).contains(&first.accuracy));
}

#[test]
fn test_labelled_file_trains_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("training_dataset.csv");

    let mut file = std::fs::File::create(&data).unwrap();
    writeln!(file, "label,text").unwrap();
    for sample in separable_samples(4) {
        writeln!(file, "{},\"{}\"", sample.label.unwrap(), sample.text).unwrap();
    }
    writeln!(file, "not-a-label,skipped").unwrap();
    drop(file);

    let (train, valid) = orientation::Dataset::load(&data, 0.25, true, 42).unwrap();
    assert_eq!(train.len() + valid.len(), 12);
    assert_eq!(valid.len(), 3);

    let path = dir.path().join("nested").join("model");
    Trainer::new(config(1))
        .fit(training_adapter(N_CLASSES), &train, &valid, &path, &mut ())
        .unwrap();

    assert!(checkpoint::file_path(&path).exists());
}

#[test]
fn test_out_of_range_label_is_rejected_before_training() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model");

    let mut samples = separable_samples(2);
    samples.push(Sample::new("aaaa".to_string(), Some(5)));
    let train = orientation::Dataset::new(samples);
    let valid = orientation::Dataset::new(separable_samples(1));

    let mut trainer = Trainer::new(config(1));
    let result = trainer.fit(training_adapter(N_CLASSES), &train, &valid, &path, &mut ());

    assert!(matches!(result, Err(Error::DataFormat(_))));
    assert_eq!(trainer.phase(), Phase::Idle);
    assert!(!checkpoint::file_path(&path).exists());
}

#[test]
fn test_head_must_match_configured_classes() {
    let dir = tempfile::tempdir().unwrap();
    let (train, valid) = split(4);

    let result = Trainer::new(config(1)).fit(
        training_adapter(2),
        &train,
        &valid,
        &dir.path().join("model"),
        &mut (),
    );

    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[test]
fn test_inference_adapter_cannot_be_trained() {
    let dir = tempfile::tempdir().unwrap();
    let (train, valid) = split(4);

    let adapter = Adapter::for_inference(
        tokenizer(),
        TinyClassifier::<TestAutodiffBackend>::new(N_CLASSES, &device()),
        device(),
        16,
    );

    let result = Trainer::new(config(1)).fit(
        adapter,
        &train,
        &valid,
        &dir.path().join("model"),
        &mut (),
    );

    assert!(matches!(result, Err(Error::Mode { .. })));
}

#[test]
fn test_checkpoint_restores_matching_architecture() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model");
    let texts = vec!["aaaa aaaa".to_string(), "zzzz".to_string()];

    let saved = inference_adapter(N_CLASSES);
    checkpoint::save::<TestBackend, _>(saved.model(), &path).unwrap();

    TestBackend::seed(99);
    let fresh = TinyClassifier::<TestBackend>::new(N_CLASSES, &device());
    let loaded = checkpoint::load::<TestBackend, _>(fresh, &path, &device()).unwrap();
    let restored = Adapter::for_inference(tokenizer(), loaded, device(), 16);

    let expected = saved.logits(&saved.encode(&texts, 16).unwrap());
    let actual = restored.logits(&restored.encode(&texts, 16).unwrap());

    expected.into_data().assert_approx_eq(&actual.into_data(), 2);
}

#[test]
fn test_checkpoint_with_different_head_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model");

    checkpoint::save::<TestBackend, _>(inference_adapter(N_CLASSES).model(), &path).unwrap();

    let wider = TinyClassifier::<TestBackend>::new(N_CLASSES + 1, &device());
    let result = checkpoint::load::<TestBackend, _>(wider, &path, &device());

    assert!(matches!(result, Err(Error::Checkpoint(_))));
}

#[test]
fn test_missing_checkpoint_is_a_checkpoint_error() {
    let dir = tempfile::tempdir().unwrap();

    let model = TinyClassifier::<TestBackend>::new(N_CLASSES, &device());
    let result = checkpoint::load::<TestBackend, _>(model, &dir.path().join("absent"), &device());

    assert!(matches!(result, Err(Error::Checkpoint(_))));
}

#[test]
fn test_dotted_checkpoint_names_do_not_collide() {
    let dir = tempfile::tempdir().unwrap();
    let v1 = dir.path().join("model.v1");
    let v2 = dir.path().join("model.v2");

    checkpoint::save::<TestBackend, _>(inference_adapter(N_CLASSES).model(), &v1).unwrap();
    checkpoint::save::<TestBackend, _>(inference_adapter(N_CLASSES + 1).model(), &v2).unwrap();

    assert!(checkpoint::file_path(&v1).exists());
    assert!(checkpoint::file_path(&v2).exists());

    let narrow = TinyClassifier::<TestBackend>::new(N_CLASSES, &device());
    assert!(checkpoint::load::<TestBackend, _>(narrow, &v1, &device()).is_ok());

    let wide = TinyClassifier::<TestBackend>::new(N_CLASSES + 1, &device());
    assert!(checkpoint::load::<TestBackend, _>(wide, &v2, &device()).is_ok());
}

#[test]
fn test_out_of_range_learning_rate_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (train, valid) = split(4);

    for config in [config(1).with_learning_rate(0.0), config(1).with_max_grad_norm(0.0)] {
        let result = Trainer::new(config).fit(
            training_adapter(N_CLASSES),
            &train,
            &valid,
            &dir.path().join("model"),
            &mut (),
        );

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
