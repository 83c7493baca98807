use crate::domain::payment::MissionPayment;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct PaymentRow<'a> {
    payment: &'a str,
    status: &'static str,
    amount: Decimal,
    currency: &'a str,
    has_dispute: bool,
}

/// Writes the final payment report as CSV.
pub struct PaymentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PaymentWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes one row per payment, amounts in major units.
    pub fn write_payments(&mut self, payments: &[MissionPayment]) -> Result<()> {
        for payment in payments {
            self.writer.serialize(PaymentRow {
                payment: &payment.id,
                status: payment.status.as_str(),
                amount: payment.amount.to_major(),
                currency: payment.currency.as_str(),
                has_dispute: payment.has_dispute,
            })?;
        }
        if payments.is_empty() {
            self.writer
                .write_record(["payment", "status", "amount", "currency", "has_dispute"])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::PaymentStatus;
    use crate::domain::payment::tests::sample_payment;
    use chrono::Utc;

    fn render(payments: &[MissionPayment]) -> String {
        let mut buffer = Vec::new();
        PaymentWriter::new(&mut buffer).write_payments(payments).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_writer_renders_major_units() {
        let mut received = sample_payment("p1", false);
        received.transition(PaymentStatus::Received, Utc::now());
        let mut disputed = sample_payment("p2", true);
        disputed.has_dispute = true;

        let output = render(&[received, disputed]);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "payment,status,amount,currency,has_dispute");
        assert_eq!(lines[1], "p1,received,100.00,eur,false");
        assert_eq!(lines[2], "p2,pending,100.00,eur,true");
    }

    #[test]
    fn test_writer_empty_report_has_header() {
        assert_eq!(render(&[]), "payment,status,amount,currency,has_dispute\n");
    }
}
