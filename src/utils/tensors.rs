use burn::tensor::{backend::Backend, Data, ElementConversion, Int, Shape, Tensor};

/// Build a `[rows, width]` integer tensor from rows that are already exactly `width` long
pub fn int_matrix<B: Backend>(
    rows: &[Vec<u32>],
    width: usize,
    device: &B::Device,
) -> Tensor<B, 2, Int> {
    let values: Vec<B::IntElem> = rows
        .iter()
        .flat_map(|row| row.iter().map(|value| (*value as i64).elem()))
        .collect();

    Tensor::from_data(Data::new(values, Shape::new([rows.len(), width])), device)
}

/// Build a 1D integer tensor of class ids
pub fn int_vector<B: Backend>(values: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let data: Vec<B::IntElem> = values.iter().map(|value| (*value as i64).elem()).collect();

    Tensor::from_data(Data::new(data, Shape::new([values.len()])), device)
}

/// Read a 1D integer tensor back as class ids
pub fn int_values<B: Backend>(tensor: Tensor<B, 1, Int>) -> Vec<usize> {
    tensor
        .into_data()
        .convert::<i64>()
        .value
        .into_iter()
        .map(|value| value as usize)
        .collect()
}

/// Arg-max class id of each row of a `[batch_size, n_classes]` tensor
pub fn argmax_rows<B: Backend>(logits: Tensor<B, 2>) -> Vec<usize> {
    logits
        .argmax(1)
        .into_data()
        .convert::<i64>()
        .value
        .into_iter()
        .map(|index| index as usize)
        .collect()
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_argmax_rows() {
        let device = Default::default();
        let logits = Tensor::<NdArray, 2>::from_floats(
            [[0.1, 0.7, 0.2], [2.0, -1.0, 0.5], [0.0, 0.0, 3.0]],
            &device,
        );

        assert_eq!(argmax_rows(logits), vec![1, 0, 2]);
    }

    #[test]
    fn test_int_vector_reads_back() {
        let device = Default::default();

        assert_eq!(int_values(int_vector::<NdArray>(&[2, 0, 1], &device)), vec![2, 0, 1]);
    }

    #[test]
    fn test_int_matrix_shape() {
        let device = Default::default();
        let tensor = int_matrix::<NdArray>(&[vec![1, 2], vec![3, 4], vec![5, 6]], 2, &device);

        assert_eq!(tensor.dims(), [3, 2]);
    }
}
